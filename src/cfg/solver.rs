#[cfg(feature = "serde")]
use serde::Deserialize;

/// Measurement update discipline used on each double difference batch.
#[derive(Default, Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub enum Discipline {
    /// Weighted least squares on the batch, prior state carried as
    /// pseudo observations (information form).
    Lsq,
    /// Sequential Kalman gain update.
    #[default]
    Kalman,
    /// Kalman update with Helmert variance component re-estimation
    /// across constellation weight groups.
    Helmert,
}

fn default_max_iterations() -> usize {
    10
}

fn default_relinearizations() -> usize {
    2
}

fn default_convergence_m() -> f64 {
    1.0E-4
}

fn default_code_outlier_threshold_m() -> f64 {
    30.0
}

/// Elevation dependent measurement error model:
/// sigma² = base² + (elev / sin(e))², scaled by the code/phase ratio
/// for pseudo range rows.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct MeasurementErrorModel {
    /// Constant phase error term, meters.
    pub phase_base_m: f64,
    /// Elevation dependent phase error term, meters.
    pub phase_elevation_m: f64,
    /// Code error expressed as a multiple of the phase error.
    pub code_phase_ratio: f64,
    /// Baseline length dependent error, meters per km.
    pub baseline_m_per_km: f64,
    /// Receiver clock stability term (s/s), scaled by the rover/base
    /// sampling skew.
    pub clock_stability_s_s: f64,
}

impl Default for MeasurementErrorModel {
    fn default() -> Self {
        Self {
            phase_base_m: 0.003,
            phase_elevation_m: 0.003,
            code_phase_ratio: 100.0,
            baseline_m_per_km: 0.0,
            clock_stability_s_s: 5.0E-12,
        }
    }
}

impl MeasurementErrorModel {
    /// Single difference variance (m²) for one observable.
    /// `skew_s` is the rover/base sampling offset this epoch.
    pub(crate) fn sd_variance_m2(
        &self,
        elevation_rad: f64,
        baseline_km: f64,
        skew_s: f64,
        is_code: bool,
    ) -> f64 {
        let fact = if is_code { self.code_phase_ratio } else { 1.0 };
        let sin_el = elevation_rad.sin().max(0.05);

        let sigma2 = (fact * self.phase_base_m).powi(2)
            + (fact * self.phase_elevation_m / sin_el).powi(2)
            + (self.baseline_m_per_km * baseline_km).powi(2);

        // both receivers contribute to the single difference
        2.0 * sigma2 + (crate::constants::SPEED_OF_LIGHT_M_S * self.clock_stability_s_s * skew_s).powi(2)
    }
}

/// Process noise rates, per parameter block.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct ProcessNoise {
    /// Acceleration PSD driving the dynamic block in kinematic modes,
    /// m².s⁻³.
    pub accel_psd: f64,
    /// Residual zenith troposphere random walk, m².s⁻¹.
    pub tropo_psd: f64,
    /// Slant ionosphere random walk, m².s⁻¹.
    pub iono_psd: f64,
    /// Glonass inter frequency bias random walk, m².s⁻¹.
    pub ifb_psd: f64,
    /// Carried ambiguity random walk, cycles².s⁻¹. Usually zero:
    /// an ambiguity is a constant until it slips.
    pub ambiguity_psd: f64,
}

impl Default for ProcessNoise {
    fn default() -> Self {
        Self {
            accel_psd: 1.0,
            tropo_psd: 1.0E-8,
            iono_psd: 1.0E-5,
            ifb_psd: 1.0E-10,
            ambiguity_psd: 0.0,
        }
    }
}

/// Initial variances assigned when a parameter enters the state.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct InitialVariances {
    /// Position block, m².
    pub position_m2: f64,
    /// Velocity block, m²/s².
    pub velocity_m2_s2: f64,
    /// Residual zenith troposphere, m².
    pub tropo_m2: f64,
    /// Slant ionosphere, m².
    pub iono_m2: f64,
    /// Glonass inter frequency bias, m².
    pub ifb_m2: f64,
    /// Fresh (or reset) ambiguity, cycles².
    pub ambiguity_cycles2: f64,
}

impl Default for InitialVariances {
    fn default() -> Self {
        Self {
            position_m2: 30.0_f64.powi(2),
            velocity_m2_s2: 10.0_f64.powi(2),
            tropo_m2: 0.3_f64.powi(2),
            iono_m2: 10.0_f64.powi(2),
            ifb_m2: 1.0,
            ambiguity_cycles2: 30.0_f64.powi(2),
        }
    }
}

/// Estimation customization.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct SolverConfig {
    /// Update [Discipline] on each batch.
    #[cfg_attr(feature = "serde", serde(default))]
    pub discipline: Discipline,

    /// Gauss-Newton iteration cap in the single point solver.
    #[cfg_attr(feature = "serde", serde(default = "default_max_iterations"))]
    pub max_iterations: usize,

    /// Relinearization passes over each double difference batch.
    #[cfg_attr(feature = "serde", serde(default = "default_relinearizations"))]
    pub relinearizations: usize,

    /// Single point convergence criterion on |dx|, meters.
    #[cfg_attr(feature = "serde", serde(default = "default_convergence_m"))]
    pub convergence_m: f64,

    /// Post-fit code residual beyond which an observation is excluded
    /// and the single point solve restarts (once).
    #[cfg_attr(
        feature = "serde",
        serde(default = "default_code_outlier_threshold_m")
    )]
    pub code_outlier_threshold_m: f64,

    /// Measurement error model.
    #[cfg_attr(feature = "serde", serde(default))]
    pub error_model: MeasurementErrorModel,

    /// Process noise rates.
    #[cfg_attr(feature = "serde", serde(default))]
    pub process_noise: ProcessNoise,

    /// Initial variances.
    #[cfg_attr(feature = "serde", serde(default))]
    pub initial_variances: InitialVariances,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            discipline: Discipline::default(),
            max_iterations: default_max_iterations(),
            relinearizations: default_relinearizations(),
            convergence_m: default_convergence_m(),
            code_outlier_threshold_m: default_code_outlier_threshold_m(),
            error_model: MeasurementErrorModel::default(),
            process_noise: ProcessNoise::default(),
            initial_variances: InitialVariances::default(),
        }
    }
}
