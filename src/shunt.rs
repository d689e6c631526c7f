use num_complex::Complex64;
use sparsetools::coo::Coo;

use crate::bus::{solver_bus, v_kv_from_vpu, SolverBus};
use crate::error::DeviceError;

const SHUNT: &str = "shunt";

/// Shunt static data and per-device results.
///
/// A shunt is a fixed equivalent power draw reinterpreted as a constant
/// admittance on its bus diagonal. Dense parallel vectors indexed by shunt
/// id, same lifecycle as the generator bank but with no reactive
/// redistribution and no min/max invariant.
pub struct ShuntBank {
    p_mw: Vec<f64>,
    q_mvar: Vec<f64>,
    bus_id: Vec<usize>,
    status: Vec<bool>,

    res_p_mw: Vec<f64>,
    res_q_mvar: Vec<f64>,
    res_v_kv: Vec<f64>,
}

impl ShuntBank {
    /// Builds a bank from parallel per-shunt input slices of equal length.
    /// All shunts start connected.
    pub fn new(p_mw: &[f64], q_mvar: &[f64], bus_id: &[usize]) -> Result<Self, DeviceError> {
        let nb_shunt = p_mw.len();
        if q_mvar.len() != nb_shunt || bus_id.len() != nb_shunt {
            return Err(DeviceError::InvalidArgument(format!(
                "shunt inputs must have equal lengths: p {}, q {}, bus {}",
                nb_shunt,
                q_mvar.len(),
                bus_id.len()
            )));
        }
        Ok(Self {
            p_mw: p_mw.to_vec(),
            q_mvar: q_mvar.to_vec(),
            bus_id: bus_id.to_vec(),
            status: vec![true; nb_shunt],
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

    pub fn is_connected(&self, shunt_id: usize) -> bool {
        self.status.get(shunt_id).copied().unwrap_or(false)
    }

    pub fn p_mw(&self) -> &[f64] {
        &self.p_mw
    }

    pub fn q_mvar(&self) -> &[f64] {
        &self.q_mvar
    }

    pub fn bus_id(&self) -> &[usize] {
        &self.bus_id
    }

    /// Delivered active power results (MW). Empty until a solve has completed.
    pub fn res_p(&self) -> &[f64] {
        &self.res_p_mw
    }

    /// Delivered reactive power results (MVAr).
    pub fn res_q(&self) -> &[f64] {
        &self.res_q_mvar
    }

    /// Voltage results (kV).
    pub fn res_v(&self) -> &[f64] {
        &self.res_v_kv
    }

    fn check_id(&self, shunt_id: usize) -> Result<(), DeviceError> {
        if shunt_id >= self.len() {
            return Err(DeviceError::OutOfRange {
                device: SHUNT,
                id: shunt_id,
                n: self.len(),
            });
        }
        Ok(())
    }

    /// Subtracts each connected shunt's complex power `p + jq` from the
    /// diagonal admittance entry of its solver bus. Additive only: entries
    /// are pushed into the caller-owned COO accumulator and duplicates sum
    /// on CSR conversion, so other device types can contribute to the same
    /// diagonal. The `ac` flag is part of the device-bank calling
    /// convention; shunts stamp identically in both formulations.
    pub fn fill_ybus(
        &self,
        y_bus: &mut Coo<usize, Complex64>,
        _ac: bool,
        bus_map: &[SolverBus],
    ) -> Result<(), DeviceError> {
        for shunt_id in 0..self.len() {
            if !self.status[shunt_id] {
                continue;
            }
            let bus_solver = solver_bus(bus_map, self.bus_id[shunt_id], SHUNT, shunt_id)?;
            let y = Complex64::new(self.p_mw[shunt_id], self.q_mvar[shunt_id]);
            y_bus.push(bus_solver, bus_solver, -y);
        }
        Ok(())
    }

    /// Populates results from the converged solve. The delivered power is
    /// recomputed from the bus voltage rather than echoed from the input
    /// draw: with `y = -(p + jq)` and bus voltage `E`, the current is
    /// `I = conj(y * E)` and `S = E * I` gives `res_p = Re(S)`,
    /// `res_q = Im(S)`.
    pub fn compute_results(
        &mut self,
        _va: &[f64],
        vm: &[f64],
        v: &[Complex64],
        bus_map: &[SolverBus],
        bus_vn_kv: &[f64],
    ) -> Result<(), DeviceError> {
        let nb_shunt = self.len();
        self.res_v_kv = v_kv_from_vpu(vm, &self.status, &self.bus_id, bus_map, bus_vn_kv, SHUNT)?;
        self.res_p_mw = vec![0.0; nb_shunt];
        self.res_q_mvar = vec![0.0; nb_shunt];
        for shunt_id in 0..nb_shunt {
            if !self.status[shunt_id] {
                continue;
            }
            let bus_solver = solver_bus(bus_map, self.bus_id[shunt_id], SHUNT, shunt_id)?;
            let e = v[bus_solver];
            let y = -Complex64::new(self.p_mw[shunt_id], self.q_mvar[shunt_id]);
            let i = (y * e).conj();
            let s = e * i;
            self.res_p_mw[shunt_id] = s.re;
            self.res_q_mvar[shunt_id] = s.im;
        }
        Ok(())
    }

    /// Clears all result vectors; see `GeneratorBank::reset_results`.
    pub fn reset_results(&mut self) {
        self.res_p_mw = Vec::new();
        self.res_q_mvar = Vec::new();
        self.res_v_kv = Vec::new();
    }

    /// Changes a shunt's active power draw. Rejected on a disconnected
    /// shunt.
    pub fn change_p(&mut self, shunt_id: usize, new_p: f64) -> Result<(), DeviceError> {
        self.check_id(shunt_id)?;
        if !self.status[shunt_id] {
            return Err(DeviceError::InvalidOperation(format!(
                "cannot change the active power of disconnected shunt {}",
                shunt_id
            )));
        }
        self.p_mw[shunt_id] = new_p;
        Ok(())
    }

    /// Changes a shunt's reactive power draw. Rejected on a disconnected
    /// shunt.
    pub fn change_q(&mut self, shunt_id: usize, new_q: f64) -> Result<(), DeviceError> {
        self.check_id(shunt_id)?;
        if !self.status[shunt_id] {
            return Err(DeviceError::InvalidOperation(format!(
                "cannot change the reactive power of disconnected shunt {}",
                shunt_id
            )));
        }
        self.q_mvar[shunt_id] = new_q;
        Ok(())
    }

    /// Moves a shunt to another grid bus.
    pub fn change_bus(&mut self, shunt_id: usize, new_bus: usize) -> Result<(), DeviceError> {
        self.check_id(shunt_id)?;
        self.bus_id[shunt_id] = new_bus;
        Ok(())
    }

    /// Removes a shunt from every subsequent aggregation pass.
    pub fn deactivate(&mut self, shunt_id: usize) -> Result<(), DeviceError> {
        self.check_id(shunt_id)?;
        self.status[shunt_id] = false;
        Ok(())
    }

    /// Puts a shunt back into the aggregation passes.
    pub fn reactivate(&mut self, shunt_id: usize) -> Result<(), DeviceError> {
        self.check_id(shunt_id)?;
        self.status[shunt_id] = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{format_err, Result};

    // shunts 0 and 1 share bus 0, shunt 2 is alone on bus 1
    fn bank() -> ShuntBank {
        ShuntBank::new(&[5.0, 1.0, 2.0], &[-2.0, 4.0, 0.5], &[0, 0, 1]).unwrap()
    }

    fn bus_map() -> Vec<SolverBus> {
        vec![SolverBus::Active(0), SolverBus::Active(1)]
    }

    #[test]
    fn test_new_rejects_mismatched_lengths() -> Result<()> {
        let res = ShuntBank::new(&[1.0, 2.0], &[0.0], &[0, 1]);
        assert!(matches!(res, Err(DeviceError::InvalidArgument(_))));
        Ok(())
    }

    #[test]
    fn test_fill_ybus_stamps_diagonal() -> Result<()> {
        let bank = bank();
        let mut y_bus = Coo::with_size(2, 2);
        bank.fill_ybus(&mut y_bus, true, &bus_map())?;

        // only diagonal entries were pushed, so row sums are the diagonal
        let ones = vec![Complex64::new(1.0, 0.0); 2];
        let diag = y_bus.to_csr() * &ones;
        assert_eq!(diag[0], Complex64::new(-6.0, -2.0)); // -(5-2j) - (1+4j)
        assert_eq!(diag[1], Complex64::new(-2.0, -0.5));
        Ok(())
    }

    #[test]
    fn test_fill_ybus_skips_disconnected() -> Result<()> {
        let mut bank = bank();
        bank.deactivate(1)?;
        let mut y_bus = Coo::with_size(2, 2);
        bank.fill_ybus(&mut y_bus, true, &bus_map())?;

        let ones = vec![Complex64::new(1.0, 0.0); 2];
        let diag = y_bus.to_csr() * &ones;
        assert_eq!(diag[0], Complex64::new(-5.0, 2.0));
        Ok(())
    }

    #[test]
    fn test_fill_ybus_deactivated_bus_fails() -> Result<()> {
        let bank = bank();
        let bus_map = vec![SolverBus::Active(0), SolverBus::Deactivated];
        let mut y_bus = Coo::with_size(2, 2);
        match bank.fill_ybus(&mut y_bus, true, &bus_map) {
            Err(DeviceError::InconsistentTopology { id, bus, .. }) => {
                assert_eq!(id, 2);
                assert_eq!(bus, 1);
                Ok(())
            }
            other => Err(format_err!("expected InconsistentTopology: {:?}", other)),
        }
    }

    #[test]
    fn test_compute_results_at_nominal_voltage() -> Result<()> {
        // p=5, q=-2 at E = 1+0j: y = -(5-2j), S = E*conj(y*E) = -5-2j
        let mut bank = ShuntBank::new(&[5.0], &[-2.0], &[0]).unwrap();
        let v = [Complex64::new(1.0, 0.0)];
        bank.compute_results(&[0.0], &[1.0], &v, &[SolverBus::Active(0)], &[100.0])?;
        assert_eq!(bank.res_p()[0], -5.0);
        assert_eq!(bank.res_q()[0], -2.0);
        assert_eq!(bank.res_v()[0], 100.0);
        Ok(())
    }

    #[test]
    fn test_compute_results_scales_with_voltage() -> Result<()> {
        // off-nominal voltage: delivered power scales with |E|^2, which is
        // why the result is recomputed instead of echoing the input draw
        let mut bank = ShuntBank::new(&[5.0], &[-2.0], &[0]).unwrap();
        let v = [Complex64::new(1.05, 0.0)];
        bank.compute_results(&[0.0], &[1.05], &v, &[SolverBus::Active(0)], &[100.0])?;
        assert!((bank.res_p()[0] - 1.1025 * -5.0).abs() < 1e-12);
        assert!((bank.res_q()[0] - 1.1025 * -2.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_disconnected_shunt_gets_no_results() -> Result<()> {
        let mut bank = bank();
        bank.deactivate(0)?;
        let v = [Complex64::new(1.0, 0.0), Complex64::new(1.0, 0.0)];
        bank.compute_results(&[0.0, 0.0], &[1.0, 1.0], &v, &bus_map(), &[100.0, 225.0])?;
        assert_eq!(bank.res_p()[0], 0.0);
        assert_eq!(bank.res_q()[0], 0.0);
        assert_eq!(bank.res_v()[0], 0.0);
        assert!(bank.res_p()[1] != 0.0);
        Ok(())
    }

    #[test]
    fn test_result_lifecycle() -> Result<()> {
        let mut bank = bank();
        assert!(bank.res_p().is_empty());

        let v = [Complex64::new(1.0, 0.0), Complex64::new(1.0, 0.0)];
        bank.compute_results(&[0.0, 0.0], &[1.0, 1.0], &v, &bus_map(), &[100.0, 225.0])?;
        assert_eq!(bank.res_p().len(), 3);

        bank.reset_results();
        assert!(bank.res_p().is_empty());
        assert!(bank.res_q().is_empty());
        assert!(bank.res_v().is_empty());
        Ok(())
    }

    #[test]
    fn test_change_rules() -> Result<()> {
        let mut bank = bank();
        bank.change_p(0, 6.0)?;
        bank.change_q(0, -1.0)?;
        assert_eq!(bank.p_mw()[0], 6.0);
        assert_eq!(bank.q_mvar()[0], -1.0);

        bank.deactivate(0)?;
        assert!(matches!(
            bank.change_p(0, 1.0),
            Err(DeviceError::InvalidOperation(_))
        ));
        assert!(matches!(
            bank.change_q(0, 1.0),
            Err(DeviceError::InvalidOperation(_))
        ));
        assert!(matches!(
            bank.change_bus(9, 0),
            Err(DeviceError::OutOfRange { id: 9, n: 3, .. })
        ));
        Ok(())
    }
}
