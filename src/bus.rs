use crate::error::DeviceError;

/// Position of a grid-level bus in the solver's compacted numbering.
///
/// Grid-level ids cover the full bus set, deactivated buses included.
/// Solver-level indices are a consecutive numbering over only the buses of
/// the currently solved island. The topology manager owns the mapping and
/// passes it to the banks as a grid-bus-indexed slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverBus {
    /// The bus is part of the solved island, at this solver index.
    Active(usize),
    /// The bus is not part of the solved island.
    Deactivated,
}

impl SolverBus {
    pub fn is_active(&self) -> bool {
        matches!(self, SolverBus::Active(_))
    }
}

/// Resolves a connected device's grid bus to its solver index.
///
/// A grid bus beyond the end of the map is the same topology inconsistency
/// as a deactivated one, caught one step earlier.
pub(crate) fn solver_bus(
    bus_map: &[SolverBus],
    grid_bus: usize,
    device: &'static str,
    id: usize,
) -> Result<usize, DeviceError> {
    match bus_map.get(grid_bus) {
        Some(SolverBus::Active(solver_id)) => Ok(*solver_id),
        _ => Err(DeviceError::InconsistentTopology {
            device,
            id,
            bus: grid_bus,
        }),
    }
}

/// Converts the solver's per-unit voltage magnitudes into per-device kV
/// results using each device's bus nominal voltage.
///
/// Entries for disconnected devices are left at 0.0.
pub(crate) fn v_kv_from_vpu(
    vm: &[f64],
    status: &[bool],
    bus_id: &[usize],
    bus_map: &[SolverBus],
    bus_vn_kv: &[f64],
    device: &'static str,
) -> Result<Vec<f64>, DeviceError> {
    let mut res_v = vec![0.0; status.len()];
    for id in 0..status.len() {
        if !status[id] {
            continue;
        }
        let bus_solver = solver_bus(bus_map, bus_id[id], device, id)?;
        res_v[id] = vm[bus_solver] * bus_vn_kv[bus_id[id]];
    }
    Ok(res_v)
}
