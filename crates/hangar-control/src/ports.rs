//! Host port allocation.
//!
//! Reservations are tracked in-process; a probe checks whether a port is free
//! on the host before it is handed out. Probing is best-effort: another
//! process may bind the port between the probe and the container start, which
//! is why callers re-verify immediately before binding.

use std::collections::HashSet;
use std::fmt;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::{Arc, RwLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::PortConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::ProjectId;

/// Inclusive range of host ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortRange {
    /// First port.
    pub start: u16,
    /// Last port.
    pub end: u16,
}

impl PortRange {
    /// Create a range, rejecting empty ranges and port 0.
    pub fn new(start: u16, end: u16) -> ControlResult<Self> {
        if start == 0 || start > end {
            return Err(ControlError::Config(format!(
                "invalid port range {start}-{end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Whether `port` lies in the range.
    #[must_use]
    pub const fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Preferences for an allocation.
#[derive(Debug, Clone, Default)]
pub struct PortHint {
    /// Ports to try first, typically the ones a project held before.
    pub preferred: Vec<u16>,
    /// Narrower range to scan instead of the allocator's own.
    pub range: Option<PortRange>,
}

impl PortHint {
    /// Hint preferring the given ports.
    #[must_use]
    pub fn preferring(ports: impl Into<Vec<u16>>) -> Self {
        Self {
            preferred: ports.into(),
            range: None,
        }
    }
}

/// Result of an allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortAllocation {
    /// Allocated ports in request order.
    pub ports: Vec<u16>,
    /// Subset of `ports` newly reserved by this call. Releasing these undoes
    /// the allocation without touching reservations the project already had.
    pub reserved: Vec<u16>,
}

/// Allocates host ports to projects.
///
/// A port is reserved by at most one project at a time.
pub trait PortAllocator: Send + Sync {
    /// Allocate `count` ports for a project.
    ///
    /// Either all ports are allocated or none are.
    fn allocate(
        &self,
        project: &ProjectId,
        count: usize,
        hint: &PortHint,
    ) -> ControlResult<PortAllocation>;

    /// Release ports held by a project. Ports it does not hold are ignored.
    fn release(&self, project: &ProjectId, ports: &[u16]) -> ControlResult<()>;

    /// Check that the project still holds `ports` and that they are free on
    /// the host.
    fn verify(&self, project: &ProjectId, ports: &[u16]) -> ControlResult<()>;

    /// Ports currently reserved by a project, ascending.
    fn reservations(&self, project: &ProjectId) -> Vec<u16>;
}

/// Create a port allocator from configuration.
pub fn create_port_allocator(config: &PortConfig) -> ControlResult<Arc<dyn PortAllocator>> {
    let range = PortRange::new(config.range_start, config.range_end)?;
    Ok(Arc::new(HostPortAllocator::new(range, Arc::new(TcpProbe))))
}

// =============================================================================
// Probes
// =============================================================================

/// Checks whether a host port is free.
pub trait PortProbe: Send + Sync + fmt::Debug {
    /// Whether the port can be bound right now.
    fn is_free(&self, port: u16) -> bool;
}

/// Probe that binds a TCP listener on the loopback interface.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

impl PortProbe for TcpProbe {
    fn is_free(&self, port: u16) -> bool {
        TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
    }
}

/// Probe answering from a configurable set of busy ports.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    busy: RwLock<HashSet<u16>>,
}

impl ScriptedProbe {
    /// Create a probe reporting every port as free.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `ports` as in use.
    pub fn mark_busy(&self, ports: impl IntoIterator<Item = u16>) {
        if let Ok(mut busy) = self.busy.write() {
            busy.extend(ports);
        }
    }

    /// Report `port` as free again.
    pub fn mark_free(&self, port: u16) {
        if let Ok(mut busy) = self.busy.write() {
            busy.remove(&port);
        }
    }
}

impl PortProbe for ScriptedProbe {
    fn is_free(&self, port: u16) -> bool {
        self.busy.read().map(|b| !b.contains(&port)).unwrap_or(false)
    }
}

// =============================================================================
// Host allocator
// =============================================================================

/// Allocator handing out ports from a fixed range.
#[derive(Debug)]
pub struct HostPortAllocator {
    range: PortRange,
    reservations: DashMap<u16, ProjectId>,
    probe: Arc<dyn PortProbe>,
}

enum Claim {
    /// Newly reserved by this call.
    Reserved,
    /// Already held by the same project.
    Held,
    /// Taken by another project or busy on the host.
    Unavailable,
}

impl HostPortAllocator {
    /// Create an allocator over `range`.
    #[must_use]
    pub fn new(range: PortRange, probe: Arc<dyn PortProbe>) -> Self {
        Self {
            range,
            reservations: DashMap::new(),
            probe,
        }
    }

    /// The allocation range.
    #[must_use]
    pub const fn range(&self) -> PortRange {
        self.range
    }

    /// Total number of reserved ports across all projects.
    #[must_use]
    pub fn reserved_count(&self) -> usize {
        self.reservations.len()
    }

    fn claim(&self, project: &ProjectId, port: u16) -> Claim {
        match self.reservations.entry(port) {
            Entry::Occupied(entry) if entry.get() == project => Claim::Held,
            Entry::Occupied(_) => Claim::Unavailable,
            Entry::Vacant(entry) => {
                if self.probe.is_free(port) {
                    entry.insert(project.clone());
                    Claim::Reserved
                } else {
                    Claim::Unavailable
                }
            }
        }
    }

    fn undo(&self, project: &ProjectId, reserved: &[u16]) {
        for port in reserved {
            self.reservations.remove_if(port, |_, owner| owner == project);
        }
    }
}

impl PortAllocator for HostPortAllocator {
    fn allocate(
        &self,
        project: &ProjectId,
        count: usize,
        hint: &PortHint,
    ) -> ControlResult<PortAllocation> {
        let mut allocation = PortAllocation::default();
        if count == 0 {
            return Ok(allocation);
        }

        let range = hint.range.unwrap_or(self.range);
        let candidates = hint
            .preferred
            .iter()
            .copied()
            .chain(range.start..=range.end);

        for port in candidates {
            if allocation.ports.len() == count {
                break;
            }
            if port == 0 || allocation.ports.contains(&port) {
                continue;
            }
            match self.claim(project, port) {
                Claim::Reserved => {
                    allocation.ports.push(port);
                    allocation.reserved.push(port);
                }
                Claim::Held => allocation.ports.push(port),
                Claim::Unavailable => {}
            }
        }

        if allocation.ports.len() < count {
            self.undo(project, &allocation.reserved);
            return Err(ControlError::allocation(format!(
                "needed {count} free ports in {range}, found {}",
                allocation.ports.len()
            )));
        }

        debug!(
            project = %project,
            ports = ?allocation.ports,
            reserved = ?allocation.reserved,
            "ports allocated"
        );
        Ok(allocation)
    }

    fn release(&self, project: &ProjectId, ports: &[u16]) -> ControlResult<()> {
        for port in ports {
            let removed = self
                .reservations
                .remove_if(port, |_, owner| owner == project);
            if removed.is_none() && self.reservations.contains_key(port) {
                warn!(project = %project, port, "not releasing port held by another project");
            }
        }
        debug!(project = %project, ports = ?ports, "ports released");
        Ok(())
    }

    fn verify(&self, project: &ProjectId, ports: &[u16]) -> ControlResult<()> {
        for &port in ports {
            let owned = self
                .reservations
                .get(&port)
                .is_some_and(|owner| owner.value() == project);
            if !owned {
                return Err(ControlError::allocation(format!(
                    "port {port} is not reserved for {project}"
                )));
            }
            if !self.probe.is_free(port) {
                return Err(ControlError::allocation(format!(
                    "port {port} is in use on the host"
                )));
            }
        }
        Ok(())
    }

    fn reservations(&self, project: &ProjectId) -> Vec<u16> {
        let mut ports: Vec<u16> = self
            .reservations
            .iter()
            .filter(|entry| entry.value() == project)
            .map(|entry| *entry.key())
            .collect();
        ports.sort_unstable();
        ports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ProjectId {
        ProjectId::parse(s).unwrap()
    }

    fn allocator(start: u16, end: u16) -> (HostPortAllocator, Arc<ScriptedProbe>) {
        let probe = Arc::new(ScriptedProbe::new());
        let allocator = HostPortAllocator::new(PortRange::new(start, end).unwrap(), probe.clone());
        (allocator, probe)
    }

    #[test]
    fn range_rejects_empty() {
        assert!(PortRange::new(20010, 20000).is_err());
        assert!(PortRange::new(0, 10).is_err());
        assert!(PortRange::new(20000, 20000).is_ok());
    }

    #[test]
    fn allocates_from_range_start() {
        let (allocator, _) = allocator(20000, 20009);
        let allocation = allocator
            .allocate(&id("site-1"), 2, &PortHint::default())
            .unwrap();

        assert_eq!(allocation.ports, vec![20000, 20001]);
        assert_eq!(allocation.reserved, allocation.ports);
        assert_eq!(allocator.reservations(&id("site-1")), vec![20000, 20001]);
    }

    #[test]
    fn ports_are_never_shared() {
        let (allocator, _) = allocator(20000, 20003);
        let a = allocator.allocate(&id("a"), 2, &PortHint::default()).unwrap();
        let b = allocator.allocate(&id("b"), 2, &PortHint::default()).unwrap();

        assert!(a.ports.iter().all(|p| !b.ports.contains(p)));

        // A preferred port held by someone else is skipped.
        let c = allocator.allocate(&id("c"), 1, &PortHint::preferring(vec![20000]));
        assert!(c.is_err());
    }

    #[test]
    fn skips_busy_host_ports() {
        let (allocator, probe) = allocator(20000, 20009);
        probe.mark_busy([20000, 20001]);

        let allocation = allocator
            .allocate(&id("site-1"), 1, &PortHint::default())
            .unwrap();
        assert_eq!(allocation.ports, vec![20002]);
    }

    #[test]
    fn preferred_ports_already_held_are_reused() {
        let (allocator, _) = allocator(20000, 20009);
        let project = id("site-1");
        allocator.allocate(&project, 1, &PortHint::default()).unwrap();

        let allocation = allocator
            .allocate(&project, 2, &PortHint::preferring(vec![20000]))
            .unwrap();
        assert_eq!(allocation.ports, vec![20000, 20001]);
        assert_eq!(allocation.reserved, vec![20001]);
    }

    #[test]
    fn shortfall_leaves_no_reservations() {
        let (allocator, probe) = allocator(20000, 20002);
        probe.mark_busy([20001, 20002]);

        let err = allocator
            .allocate(&id("site-1"), 2, &PortHint::default())
            .unwrap_err();
        assert!(matches!(err, ControlError::Allocation(_)));
        assert!(allocator.reservations(&id("site-1")).is_empty());
        assert_eq!(allocator.reserved_count(), 0);
    }

    #[test]
    fn release_ignores_other_projects() {
        let (allocator, _) = allocator(20000, 20009);
        let a = allocator.allocate(&id("a"), 1, &PortHint::default()).unwrap();

        allocator.release(&id("b"), &a.ports).unwrap();
        assert_eq!(allocator.reservations(&id("a")), a.ports);

        allocator.release(&id("a"), &a.ports).unwrap();
        allocator.release(&id("a"), &a.ports).unwrap();
        assert!(allocator.reservations(&id("a")).is_empty());
    }

    #[test]
    fn verify_checks_ownership_and_host() {
        let (allocator, probe) = allocator(20000, 20009);
        let project = id("site-1");
        let allocation = allocator.allocate(&project, 1, &PortHint::default()).unwrap();

        allocator.verify(&project, &allocation.ports).unwrap();
        assert!(allocator.verify(&id("other"), &allocation.ports).is_err());

        probe.mark_busy(allocation.ports.clone());
        assert!(allocator.verify(&project, &allocation.ports).is_err());
    }
}
