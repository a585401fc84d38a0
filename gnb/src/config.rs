//! YAML Configuration Structures
//!
//! Section names follow the srsRAN gNB configuration file: `ru_sdr` and `cell_cfg` describe
//! the radio and the carrier, `lower_phy` sizes the downlink pipeline and `test_mode` drives
//! the standalone run of this binary.

use anyhow::{anyhow, Context, Result};
use common::{Bandwidth, CyclicPrefix, SamplingRate, SubcarrierSpacing};
use lower_phy::{AmplitudeControlConfig, DownlinkProcessorConfig};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GnbConfig {
    /// RU SDR configuration
    pub ru_sdr: RuSdrConfig,
    /// Cell configuration
    pub cell_cfg: CellConfig,
    /// Downlink lower PHY pipeline sizing
    #[serde(default)]
    pub lower_phy: LowerPhyConfig,
    /// Amplitude control stages
    #[serde(default)]
    pub amplitude_control: AmplitudeControlSection,
    /// Standalone test run
    #[serde(default)]
    pub test_mode: TestModeConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// RU SDR configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuSdrConfig {
    /// Sample rate in MHz
    pub srate: f64,
    /// Transmit time offset in samples
    #[serde(default)]
    pub time_alignment_calibration: i64,
}

/// Cell configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellConfig {
    /// Downlink ARFCN
    pub dl_arfcn: u32,
    /// Band number
    #[serde(default)]
    pub band: u16,
    /// Channel bandwidth in MHz
    #[serde(rename = "channel_bandwidth_MHz")]
    pub channel_bandwidth_mhz: u32,
    /// Common subcarrier spacing in kHz
    pub common_scs: u32,
    /// Number of downlink antennas
    #[serde(default = "default_nof_antennas_dl")]
    pub nof_antennas_dl: usize,
    /// Cyclic prefix
    #[serde(default = "default_cyclic_prefix")]
    pub cyclic_prefix: CyclicPrefix,
}

fn default_nof_antennas_dl() -> usize {
    1
}

fn default_cyclic_prefix() -> CyclicPrefix {
    CyclicPrefix::Normal
}

/// Downlink lower PHY configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LowerPhyConfig {
    /// Slots the TTI boundary is announced ahead of transmission
    #[serde(default = "default_tti_advance")]
    pub nof_slot_tti_in_advance: u32,
    /// Slots a slot is dispatched for modulation ahead of transmission
    #[serde(default = "default_modulation_lead")]
    pub modulation_lead_slots: u32,
    #[serde(default = "default_nof_modulators")]
    pub nof_modulators: usize,
    #[serde(default = "default_request_pool_size")]
    pub request_pool_size: usize,
    #[serde(default = "default_cfo_queue_size")]
    pub cfo_queue_size: usize,
    /// Largest accepted transmit time offset in samples, one subframe if absent
    #[serde(default)]
    pub max_tx_time_offset: Option<u64>,
    /// Modulation tasks allowed in flight on the executor
    #[serde(default = "default_max_pending_tasks")]
    pub max_pending_tasks: usize,
}

fn default_tti_advance() -> u32 {
    2
}

fn default_modulation_lead() -> u32 {
    1
}

fn default_nof_modulators() -> usize {
    4
}

fn default_request_pool_size() -> usize {
    16
}

fn default_cfo_queue_size() -> usize {
    128
}

fn default_max_pending_tasks() -> usize {
    1024
}

impl Default for LowerPhyConfig {
    fn default() -> Self {
        Self {
            nof_slot_tti_in_advance: default_tti_advance(),
            modulation_lead_slots: default_modulation_lead(),
            nof_modulators: default_nof_modulators(),
            request_pool_size: default_request_pool_size(),
            cfo_queue_size: default_cfo_queue_size(),
            max_tx_time_offset: None,
            max_pending_tasks: default_max_pending_tasks(),
        }
    }
}

/// Amplitude control stages
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AmplitudeControlSection {
    /// Applied to every modulated symbol
    #[serde(default)]
    pub modulation: AmplitudeSettings,
    /// Applied to the transmitted samples after CFO correction
    #[serde(default)]
    pub baseband: AmplitudeSettings,
}

/// Amplitude controller settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AmplitudeSettings {
    #[serde(default)]
    pub enable_clipping: bool,
    #[serde(default)]
    pub gain_db: f32,
    #[serde(default = "default_ceiling_dbfs")]
    pub ceiling_dbfs: f32,
    #[serde(default = "default_full_scale_amplitude")]
    pub full_scale_amplitude: f32,
}

fn default_ceiling_dbfs() -> f32 {
    -0.1
}

fn default_full_scale_amplitude() -> f32 {
    1.0
}

impl Default for AmplitudeSettings {
    fn default() -> Self {
        Self {
            enable_clipping: false,
            gain_db: 0.0,
            ceiling_dbfs: default_ceiling_dbfs(),
            full_scale_amplitude: default_full_scale_amplitude(),
        }
    }
}

impl From<&AmplitudeSettings> for AmplitudeControlConfig {
    fn from(settings: &AmplitudeSettings) -> Self {
        Self {
            enable_clipping: settings.enable_clipping,
            gain_db: settings.gain_db,
            ceiling_dbfs: settings.ceiling_dbfs,
            full_scale_amplitude: settings.full_scale_amplitude,
        }
    }
}

/// Standalone test run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TestModeConfig {
    /// Number of slots to transmit
    #[serde(default = "default_nof_slots")]
    pub nof_slots: u32,
    /// Samples requested per baseband buffer
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Fraction of the resource blocks filled with random QPSK
    #[serde(default = "default_load")]
    pub load: f32,
    /// Pace the baseband loop to real time
    #[serde(default)]
    pub realtime: bool,
    /// Frequency offset applied from `cfo_start_slot`
    #[serde(default)]
    pub cfo_hz: Option<f64>,
    #[serde(default)]
    pub cfo_drift_hz_s: f64,
    #[serde(default)]
    pub cfo_start_slot: u32,
    /// File receiving the port 0 samples as interleaved little-endian f32
    #[serde(default)]
    pub iq_file: Option<String>,
}

fn default_nof_slots() -> u32 {
    1000
}

fn default_buffer_size() -> usize {
    1024
}

fn default_load() -> f32 {
    1.0
}

impl Default for TestModeConfig {
    fn default() -> Self {
        Self {
            nof_slots: default_nof_slots(),
            buffer_size: default_buffer_size(),
            load: default_load(),
            realtime: false,
            cfo_hz: None,
            cfo_drift_hz_s: 0.0,
            cfo_start_slot: 0,
            iq_file: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub all_level: String,
    /// Interval between statistics reports in seconds
    #[serde(default = "default_stats_period")]
    pub stats_period_s: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_period() -> u64 {
    1
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            all_level: default_log_level(),
            stats_period_s: default_stats_period(),
        }
    }
}

/// Center frequency of an NR-ARFCN (TS 38.104 section 5.4.2.1)
pub fn arfcn_to_hz(arfcn: u32) -> Option<f64> {
    let arfcn = arfcn as f64;
    match arfcn {
        n if n < 600_000.0 => Some(n * 5e3),
        n if n < 2_016_667.0 => Some(3_000e6 + (n - 600_000.0) * 15e3),
        n if n <= 3_279_165.0 => Some(24_250.08e6 + (n - 2_016_667.0) * 60e3),
        _ => None,
    }
}

impl GnbConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&contents)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Subcarrier spacing of the cell
    pub fn scs(&self) -> Result<SubcarrierSpacing> {
        SubcarrierSpacing::from_u32(self.cell_cfg.common_scs)
            .ok_or_else(|| anyhow!("Invalid subcarrier spacing: {} kHz", self.cell_cfg.common_scs))
    }

    /// Build the downlink processor configuration
    pub fn downlink_config(&self) -> Result<DownlinkProcessorConfig> {
        let scs = self.scs()?;
        let bandwidth = Bandwidth::from_mhz(self.cell_cfg.channel_bandwidth_mhz).ok_or_else(|| {
            anyhow!("Invalid bandwidth: {} MHz", self.cell_cfg.channel_bandwidth_mhz)
        })?;
        let nof_subcarriers = bandwidth.nof_prb(scs)? as usize * 12;
        let center_freq_hz = arfcn_to_hz(self.cell_cfg.dl_arfcn)
            .ok_or_else(|| anyhow!("Invalid DL ARFCN: {}", self.cell_cfg.dl_arfcn))?;

        let mut config = DownlinkProcessorConfig::new(
            scs,
            self.cell_cfg.cyclic_prefix,
            SamplingRate::from_mhz(self.ru_sdr.srate),
            self.cell_cfg.nof_antennas_dl,
            nof_subcarriers,
        );
        config.ofdm.center_freq_hz = center_freq_hz;
        config.nof_slot_tti_in_advance = self.lower_phy.nof_slot_tti_in_advance;
        config.modulation_lead_slots = self.lower_phy.modulation_lead_slots;
        config.nof_modulators = self.lower_phy.nof_modulators;
        config.request_pool_size = self.lower_phy.request_pool_size;
        config.cfo_queue_size = self.lower_phy.cfo_queue_size;
        if let Some(max_offset) = self.lower_phy.max_tx_time_offset {
            config.max_tx_time_offset = max_offset;
        }
        config.modulation_amplitude = (&self.amplitude_control.modulation).into();
        config.baseband_amplitude = (&self.amplitude_control.baseband).into();

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
ru_sdr:
  srate: 23.04
cell_cfg:
  dl_arfcn: 368500
  band: 3
  channel_bandwidth_MHz: 10
  common_scs: 15
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = GnbConfig::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(config.cell_cfg.nof_antennas_dl, 1);
        assert_eq!(config.cell_cfg.cyclic_prefix, CyclicPrefix::Normal);
        assert_eq!(config.lower_phy.nof_slot_tti_in_advance, 2);
        assert_eq!(config.lower_phy.nof_modulators, 4);
        assert_eq!(config.test_mode.nof_slots, 1000);
        assert!(config.test_mode.iq_file.is_none());
        assert_eq!(config.log.all_level, "info");

        let downlink = config.downlink_config().unwrap();
        assert_eq!(downlink.scs, SubcarrierSpacing::Scs15);
        assert_eq!(downlink.ofdm.nof_subcarriers, 52 * 12);
        assert_eq!(downlink.dft_size().unwrap(), 1536);
        assert!((downlink.ofdm.center_freq_hz - 1842.5e6).abs() < 1.0);
        assert_eq!(downlink.max_tx_time_offset, 23040);
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
ru_sdr:
  srate: 61.44
  time_alignment_calibration: -12
cell_cfg:
  dl_arfcn: 650000
  channel_bandwidth_MHz: 40
  common_scs: 30
  nof_antennas_dl: 2
lower_phy:
  nof_slot_tti_in_advance: 4
  modulation_lead_slots: 2
  nof_modulators: 8
  request_pool_size: 32
  max_tx_time_offset: 1000
amplitude_control:
  baseband:
    enable_clipping: true
    ceiling_dbfs: -1.0
test_mode:
  nof_slots: 20
  cfo_hz: 150.0
  iq_file: /tmp/dl.iq
"#;
        let config = GnbConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.ru_sdr.time_alignment_calibration, -12);
        assert_eq!(config.test_mode.cfo_hz, Some(150.0));

        let downlink = config.downlink_config().unwrap();
        assert_eq!(downlink.nof_tx_ports, 2);
        assert_eq!(downlink.ofdm.nof_subcarriers, 106 * 12);
        assert_eq!(downlink.nof_modulators, 8);
        assert_eq!(downlink.max_tx_time_offset, 1000);
        assert!(downlink.baseband_amplitude.enable_clipping);
        assert!(!downlink.modulation_amplitude.enable_clipping);
        assert!((downlink.ofdm.center_freq_hz - 3750e6).abs() < 1.0);
    }

    #[test]
    fn test_invalid_cell_is_rejected() {
        let mut config = GnbConfig::from_yaml_str(MINIMAL).unwrap();
        config.cell_cfg.common_scs = 45;
        assert!(config.downlink_config().is_err());

        let mut config = GnbConfig::from_yaml_str(MINIMAL).unwrap();
        config.cell_cfg.channel_bandwidth_mhz = 7;
        assert!(config.downlink_config().is_err());

        // 100 MHz does not exist at 15 kHz.
        let mut config = GnbConfig::from_yaml_str(MINIMAL).unwrap();
        config.cell_cfg.channel_bandwidth_mhz = 100;
        assert!(config.downlink_config().is_err());

        let mut config = GnbConfig::from_yaml_str(MINIMAL).unwrap();
        config.lower_phy.nof_modulators = 1;
        assert!(config.downlink_config().is_err());
    }

    #[test]
    fn test_arfcn_to_hz() {
        assert_eq!(arfcn_to_hz(368500), Some(1842.5e6));
        assert_eq!(arfcn_to_hz(620000), Some(3300e6));
        assert!(arfcn_to_hz(3_300_000).is_none());
    }
}
