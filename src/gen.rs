use num_complex::Complex64;
use num_traits::Zero;

use crate::bus::{solver_bus, v_kv_from_vpu, SolverBus};
use crate::debug::{format_f64_vec, format_polar_vec, format_rect_vec};
use crate::error::DeviceError;

const GEN: &str = "generator";

/// Regularization added to every reactive range during dispatch so that a
/// bus where all connected generators have identical (possibly zero-width)
/// bands still splits its target, and every generator keeps a nonzero share.
const EPS_Q: f64 = 0.0001;

/// Generator static data, per-bus reactive aggregates and per-device results.
///
/// Dense parallel vectors indexed by generator id. Aggregation sweeps run in
/// ascending id order; PV-bus ordering and same-bus overwrite behavior
/// depend on it.
pub struct GeneratorBank {
    p_mw: Vec<f64>,
    vm_pu: Vec<f64>,
    min_q_mvar: Vec<f64>,
    max_q_mvar: Vec<f64>,
    bus_id: Vec<usize>,
    status: Vec<bool>,

    // per grid bus, over connected generators only; rebuilt wholesale by
    // init_q_per_bus, never maintained incrementally
    q_min_per_bus: Vec<f64>,
    q_max_per_bus: Vec<f64>,
    gen_per_bus: Vec<usize>,

    // empty until a solve has completed
    res_p_mw: Vec<f64>,
    res_q_mvar: Vec<f64>,
    res_v_kv: Vec<f64>,
}

impl GeneratorBank {
    /// Builds a bank from parallel per-generator input slices.
    ///
    /// All slices must have the same length and every generator must satisfy
    /// `min_q <= max_q`. Violating input is rejected with `InvalidArgument`
    /// and no bank is produced. All generators start connected.
    pub fn new(
        p_mw: &[f64],
        vm_pu: &[f64],
        min_q_mvar: &[f64],
        max_q_mvar: &[f64],
        bus_id: &[usize],
    ) -> Result<Self, DeviceError> {
        if min_q_mvar.len() != max_q_mvar.len() {
            return Err(DeviceError::InvalidArgument(format!(
                "min_q has {} entries but max_q has {}",
                min_q_mvar.len(),
                max_q_mvar.len()
            )));
        }
        let nb_gen = min_q_mvar.len();
        if p_mw.len() != nb_gen || vm_pu.len() != nb_gen || bus_id.len() != nb_gen {
            return Err(DeviceError::InvalidArgument(format!(
                "generator inputs must have equal lengths: p {}, v {}, bus {}, q {}",
                p_mw.len(),
                vm_pu.len(),
                bus_id.len(),
                nb_gen
            )));
        }
        for gen_id in 0..nb_gen {
            if min_q_mvar[gen_id] > max_q_mvar[gen_id] {
                return Err(DeviceError::InvalidArgument(format!(
                    "generator {}: min_q {} is above max_q {}",
                    gen_id, min_q_mvar[gen_id], max_q_mvar[gen_id]
                )));
            }
        }
        Ok(Self {
            p_mw: p_mw.to_vec(),
            vm_pu: vm_pu.to_vec(),
            min_q_mvar: min_q_mvar.to_vec(),
            max_q_mvar: max_q_mvar.to_vec(),
            bus_id: bus_id.to_vec(),
            status: vec![true; nb_gen],
            q_min_per_bus: Vec::new(),
            q_max_per_bus: Vec::new(),
            gen_per_bus: Vec::new(),
            res_p_mw: Vec::new(),
            res_q_mvar: Vec::new(),
            res_v_kv: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.p_mw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.p_mw.is_empty()
    }

    pub fn is_connected(&self, gen_id: usize) -> bool {
        self.status.get(gen_id).copied().unwrap_or(false)
    }

    pub fn p_mw(&self) -> &[f64] {
        &self.p_mw
    }

    pub fn vm_pu(&self) -> &[f64] {
        &self.vm_pu
    }

    pub fn bus_id(&self) -> &[usize] {
        &self.bus_id
    }

    /// Active power results (MW). Empty until a solve has completed.
    pub fn res_p(&self) -> &[f64] {
        &self.res_p_mw
    }

    /// Reactive power results (MVAr). Empty until `dispatch_q` has run.
    pub fn res_q(&self) -> &[f64] {
        &self.res_q_mvar
    }

    /// Voltage results (kV). Empty until a solve has completed.
    pub fn res_v(&self) -> &[f64] {
        &self.res_v_kv
    }

    fn check_id(&self, gen_id: usize) -> Result<(), DeviceError> {
        if gen_id >= self.len() {
            return Err(DeviceError::OutOfRange {
                device: GEN,
                id: gen_id,
                n: self.len(),
            });
        }
        Ok(())
    }

    /// Adds each connected generator's active power as a purely real
    /// contribution to the solver-bus injection accumulator. Reactive
    /// injection is determined after the solve, not here. Additive only;
    /// disconnected generators are skipped.
    pub fn fill_sbus(
        &self,
        s_bus: &mut [Complex64],
        bus_map: &[SolverBus],
    ) -> Result<(), DeviceError> {
        for gen_id in 0..self.len() {
            if !self.status[gen_id] {
                continue;
            }
            let bus_solver = solver_bus(bus_map, self.bus_id[gen_id], GEN, gen_id)?;
            s_bus[bus_solver] += Complex64::new(self.p_mw[gen_id], 0.0);
        }
        log::trace!("Sbus after generator injection: {}", format_rect_vec(s_bus));
        Ok(())
    }

    /// Appends the solver bus of every connected generator to the PV list,
    /// in generator-id order, first occurrence per bus. The slack bus is not
    /// PV and is skipped; `added` is the caller-supplied per-solver-bus
    /// dedup flag array, reset by the caller before each solve.
    pub fn fill_pv(
        &self,
        pv: &mut Vec<usize>,
        added: &mut [bool],
        slack_bus_solver: usize,
        bus_map: &[SolverBus],
    ) -> Result<(), DeviceError> {
        for gen_id in 0..self.len() {
            if !self.status[gen_id] {
                continue;
            }
            let bus_solver = solver_bus(bus_map, self.bus_id[gen_id], GEN, gen_id)?;
            if bus_solver == slack_bus_solver {
                continue;
            }
            if added[bus_solver] {
                continue;
            }
            pv.push(bus_solver);
            added[bus_solver] = true;
        }
        log::debug!("pv buses after generator pass: {:?}", pv);
        Ok(())
    }

    /// Populates voltage and active power results from the converged solve.
    ///
    /// `res_p` is the active setpoint (active power is not redistributed at
    /// the generator level); `res_q` is owned by `dispatch_q` and untouched
    /// here.
    pub fn compute_results(
        &mut self,
        _va: &[f64],
        vm: &[f64],
        _v: &[Complex64],
        bus_map: &[SolverBus],
        bus_vn_kv: &[f64],
    ) -> Result<(), DeviceError> {
        self.res_v_kv = v_kv_from_vpu(vm, &self.status, &self.bus_id, bus_map, bus_vn_kv, GEN)?;
        self.res_p_mw = self
            .p_mw
            .iter()
            .zip(&self.status)
            .map(|(p, on)| if *on { *p } else { 0.0 })
            .collect();
        Ok(())
    }

    /// Clears all result vectors. An empty result vector signals that no
    /// solve has completed since the last reset.
    pub fn reset_results(&mut self) {
        self.res_p_mw = Vec::new();
        self.res_q_mvar = Vec::new();
        self.res_v_kv = Vec::new();
    }

    /// Seeds a DC approximation: each connected generator with a nonzero
    /// voltage setpoint overwrites its bus entry in the caller's grid-level
    /// voltage magnitude buffer.
    pub fn vm_for_dc(&self, vm: &mut [f64]) {
        for gen_id in 0..self.len() {
            if !self.status[gen_id] {
                continue;
            }
            let setpoint = self.vm_pu[gen_id];
            if !setpoint.is_zero() {
                vm[self.bus_id[gen_id]] = setpoint;
            }
        }
    }

    /// Changes a generator's active power setpoint. Setpoints on a
    /// disconnected generator are meaningless and rejected.
    pub fn change_p(&mut self, gen_id: usize, new_p: f64) -> Result<(), DeviceError> {
        self.check_id(gen_id)?;
        if !self.status[gen_id] {
            return Err(DeviceError::InvalidOperation(format!(
                "cannot change the active power of disconnected generator {}",
                gen_id
            )));
        }
        self.p_mw[gen_id] = new_p;
        Ok(())
    }

    /// Changes a generator's voltage setpoint (pu).
    pub fn change_v(&mut self, gen_id: usize, new_vm_pu: f64) -> Result<(), DeviceError> {
        self.check_id(gen_id)?;
        if !self.status[gen_id] {
            return Err(DeviceError::InvalidOperation(format!(
                "cannot change the voltage setpoint of disconnected generator {}",
                gen_id
            )));
        }
        self.vm_pu[gen_id] = new_vm_pu;
        Ok(())
    }

    /// Moves a generator to another grid bus. Per-bus reactive aggregates
    /// become stale until `init_q_per_bus` is run again.
    pub fn change_bus(&mut self, gen_id: usize, new_bus: usize) -> Result<(), DeviceError> {
        self.check_id(gen_id)?;
        self.bus_id[gen_id] = new_bus;
        Ok(())
    }

    /// Removes a generator from every subsequent aggregation pass.
    pub fn deactivate(&mut self, gen_id: usize) -> Result<(), DeviceError> {
        self.check_id(gen_id)?;
        self.status[gen_id] = false;
        Ok(())
    }

    /// Puts a generator back into the aggregation passes.
    pub fn reactivate(&mut self, gen_id: usize) -> Result<(), DeviceError> {
        self.check_id(gen_id)?;
        self.status[gen_id] = true;
        Ok(())
    }

    /// Rescales, in place, the magnitude of each connected generator's bus
    /// voltage to its setpoint, preserving the angle. A zero-magnitude
    /// voltage is treated as unit magnitude so no NaN is produced (the entry
    /// itself stays zero). When several generators share a bus, the last one
    /// by id order wins; callers must keep same-bus setpoints consistent.
    pub fn normalize_vm(
        &self,
        v: &mut [Complex64],
        bus_map: &[SolverBus],
    ) -> Result<(), DeviceError> {
        for gen_id in 0..self.len() {
            if !self.status[gen_id] {
                continue;
            }
            let bus_solver = solver_bus(bus_map, self.bus_id[gen_id], GEN, gen_id)?;
            let mut vm = v[bus_solver].norm();
            if vm.is_zero() {
                vm = 1.0;
            }
            v[bus_solver] *= self.vm_pu[gen_id] / vm;
        }
        log::trace!("V after setpoint normalization: {}", format_polar_vec(v));
        Ok(())
    }

    /// Grid bus of the designated slack generator.
    pub fn slack_bus_id(&self, gen_id: usize) -> Result<usize, DeviceError> {
        self.check_id(gen_id)?;
        if !self.status[gen_id] {
            return Err(DeviceError::InvalidOperation(format!(
                "generator {} designated as slack is disconnected",
                gen_id
            )));
        }
        Ok(self.bus_id[gen_id])
    }

    /// Writes the solved slack active power straight into the result array
    /// at `slack_id`. The caller is responsible for passing the slack
    /// generator's index; results must exist (a solve must have completed).
    pub fn set_p_slack(&mut self, slack_id: usize, p_slack: f64) -> Result<(), DeviceError> {
        self.check_id(slack_id)?;
        if !self.status[slack_id] {
            return Err(DeviceError::InvalidOperation(format!(
                "generator {} designated as slack is disconnected",
                slack_id
            )));
        }
        if slack_id >= self.res_p_mw.len() {
            return Err(DeviceError::InvalidOperation(
                "no active power results to write the slack power into".to_string(),
            ));
        }
        self.res_p_mw[slack_id] = p_slack;
        Ok(())
    }

    /// Rebuilds the per-bus reactive aggregates: sum of `min_q`, sum of
    /// `max_q` and connected-generator count, over connected generators at
    /// each grid bus. Must run before `dispatch_q` and after any change to
    /// connection status or bus assignment.
    pub fn init_q_per_bus(&mut self, nb_bus: usize) {
        self.q_min_per_bus = vec![0.0; nb_bus];
        self.q_max_per_bus = vec![0.0; nb_bus];
        self.gen_per_bus = vec![0; nb_bus];
        for gen_id in 0..self.len() {
            if !self.status[gen_id] {
                continue;
            }
            let bus_id = self.bus_id[gen_id];
            self.q_min_per_bus[bus_id] += self.min_q_mvar[gen_id];
            self.q_max_per_bus[bus_id] += self.max_q_mvar[gen_id];
            self.gen_per_bus[bus_id] += 1;
        }
    }

    /// Distributes each grid bus's reactive target across the connected
    /// generators at that bus, filling `res_q`.
    ///
    /// A bus served by a single connected generator hands it the whole
    /// target, unmodified. Otherwise generator i receives
    /// `q_to_absorb * (max_q_i - min_q_i + eps) / (max_q_bus - min_q_bus + n*eps)`,
    /// a share of range. The generator's own min_q offset is deliberately
    /// not applied; downstream consumers depend on the unscaled form.
    /// Disconnected generators keep `res_q = 0`.
    pub fn dispatch_q(&mut self, q_by_bus: &[f64]) {
        log::trace!("q to dispatch per bus: {}", format_f64_vec(q_by_bus));
        let nb_gen = self.len();
        self.res_q_mvar = vec![0.0; nb_gen];
        for gen_id in 0..nb_gen {
            if !self.status[gen_id] {
                continue;
            }
            let bus_id = self.bus_id[gen_id];
            let q_to_absorb = q_by_bus[bus_id];
            let nb_gen_with_me = self.gen_per_bus[bus_id];
            let real_q = if nb_gen_with_me == 1 {
                q_to_absorb
            } else {
                let range_me = self.max_q_mvar[gen_id] - self.min_q_mvar[gen_id];
                let range_bus = self.q_max_per_bus[bus_id] - self.q_min_per_bus[bus_id];
                let ratio = (range_me + EPS_Q) / (range_bus + nb_gen_with_me as f64 * EPS_Q);
                q_to_absorb * ratio
            };
            self.res_q_mvar[gen_id] = real_q;
        }
    }
}
