//! The instrument controller of the LED driver test bench.
//!
//! [`InstrumentController`] owns the sessions to the four bench instruments and runs the fixed
//! measurement sequence. Every configuration write is followed by an `*OPC?` handshake before
//! the next dependent read, so settling time is left to the instruments instead of fixed delays.
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use benchctl_protocol::{Error, InputVoltage, MeasurementError, MeasurementResult};

use crate::scpi::{self, OPERATION_COMPLETE};
use crate::transport::{ResourceManager, Session};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_SUPPLY: &str = "GPIB0::5::INSTR";
pub const DEFAULT_METER: &str = "GPIB0::22::INSTR";
pub const DEFAULT_DIMMING: &str = "GPIB0::6::INSTR";
pub const DEFAULT_SCOPE: &str = "GPIB0::18::INSTR";

const SUPPLY_RESET: &str = "*RST; *CLS; CURR 7.5";
const DIMMING_RESET: &str = "*RST; *CLS; INST:NSEL 1; VOLT 5; CURR 1; OUTP OFF";
const METER_ZERO_CURRENT: &str = "ZERO:AUTO ON; CONF:CURR:DC 0.1";
const METER_VOLTAGE: &str = "*RST; CONF:VOLT:DC 100";
const METER_CURRENT: &str = "*RST; CONF:CURR:DC 0.1";
const METER_READ: &str = "READ?";
const SCOPE_FREQUENCY: &str = "MEASU:IMM:TYPE FREQuency; MEASU:IMM:SOUR CH1";
const SCOPE_VALUE: &str = "MEASU:IMM:VAL?";
const DIMMING_SENSE: &str = "MEAS:VOLT?";
const OUTPUT_ON: &str = "OUTP ON";
const OUTPUT_OFF: &str = "OUTP OFF";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Supply,
    Meter,
    Dimming,
    Scope,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Supply, Role::Meter, Role::Dimming, Role::Scope];

    pub fn name(&self) -> &'static str {
        match self {
            Role::Supply => "main supply",
            Role::Meter => "multimeter",
            Role::Dimming => "dimming supply",
            Role::Scope => "oscilloscope",
        }
    }
}

/// Addresses of the bench instruments and the I/O timeout applied to each session.
#[derive(Clone, Debug, PartialEq)]
pub struct BenchConfig {
    pub supply: String,
    pub meter: String,
    pub dimming: String,
    pub scope: String,
    pub timeout: Duration,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            supply: DEFAULT_SUPPLY.to_string(),
            meter: DEFAULT_METER.to_string(),
            dimming: DEFAULT_DIMMING.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl BenchConfig {
    pub fn address(&self, role: Role) -> &str {
        match role {
            Role::Supply => &self.supply,
            Role::Meter => &self.meter,
            Role::Dimming => &self.dimming,
            Role::Scope => &self.scope,
        }
    }
}

/// A session to one bench instrument, mapping transport failures to bench errors.
struct Instrument {
    role: Role,
    session: Box<dyn Session>,
}

impl Instrument {
    async fn open(manager: &dyn ResourceManager, role: Role, address: &str, timeout: Duration) -> crate::Result<Self> {
        log::debug!("Opening {} at {}", role.name(), address);
        let mut session = manager
            .open(address)
            .await
            .map_err(|err| Error::session_open(address, err))?;
        session
            .set_timeout(timeout)
            .await
            .map_err(|err| Error::session_open(address, err))?;
        Ok(Self { role, session })
    }

    async fn write(&mut self, command: &str) -> crate::Result<()> {
        let ret = self.session.write(command).await;
        ret.map_err(|err| Error::communication(self.session.address(), err))
    }

    async fn query(&mut self, command: &str) -> crate::Result<String> {
        let ret = self.session.query(command).await;
        ret.map_err(|err| Error::communication(self.session.address(), err))
    }

    /// Block until the instrument reports all pending operations as complete.
    async fn wait_complete(&mut self) -> crate::Result<()> {
        let reply = self.query(OPERATION_COMPLETE).await?;
        if !scpi::is_complete(&reply) {
            log::warn!("Unexpected reply `{}` from {} to {}", reply.trim(), self.role.name(), OPERATION_COMPLETE);
        }
        Ok(())
    }

    async fn read_float(&mut self, command: &str) -> crate::Result<f64> {
        let reply = self.query(command).await?;
        scpi::parse_float(&reply)
    }

    async fn close(&mut self) {
        if let Err(err) = self.session.close().await {
            log::warn!("Error closing {}: {}", self.role.name(), err);
        }
    }
}

struct Bench {
    supply: Instrument,
    meter: Instrument,
    dimming: Instrument,
    scope: Instrument,
}

impl Bench {
    /// Sessions opened before a failing one are closed when dropped.
    async fn open(manager: &dyn ResourceManager, config: &BenchConfig) -> crate::Result<Self> {
        let timeout = config.timeout;
        Ok(Bench {
            supply: Instrument::open(manager, Role::Supply, &config.supply, timeout).await?,
            meter: Instrument::open(manager, Role::Meter, &config.meter, timeout).await?,
            dimming: Instrument::open(manager, Role::Dimming, &config.dimming, timeout).await?,
            scope: Instrument::open(manager, Role::Scope, &config.scope, timeout).await?,
        })
    }

    /// Both outputs are always addressed, the first failure is returned.
    async fn outputs_off(&mut self) -> crate::Result<()> {
        let supply = self.supply.write(OUTPUT_OFF).await;
        let dimming = self.dimming.write(OUTPUT_OFF).await;
        supply.and(dimming)
    }

    async fn close(&mut self) {
        self.supply.close().await;
        self.meter.close().await;
        self.dimming.close().await;
        self.scope.close().await;
    }
}

/// Outcome of [`InstrumentController::initialize_instruments`].
/// Its `Display` form is the status message shown to the operator.
#[derive(Clone, Debug)]
pub enum InitStatus {
    Ready { baseline: f64 },
    Failed(Error),
}

impl InitStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, InitStatus::Ready { .. })
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            InitStatus::Ready { .. } => None,
            InitStatus::Failed(err) => Some(err),
        }
    }
}

impl Display for InitStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            InitStatus::Ready { .. } => f.write_str("Instruments initialized"),
            InitStatus::Failed(err) => write!(f, "Initialization failed: {}", err),
        }
    }
}

pub struct InstrumentController {
    manager: Arc<dyn ResourceManager>,
    config: BenchConfig,
    bench: Option<Bench>,
    baseline: Option<f64>,
}

impl InstrumentController {
    pub fn new(manager: Arc<dyn ResourceManager>, config: BenchConfig) -> Self {
        Self {
            manager,
            config,
            bench: None,
            baseline: None,
        }
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.bench.is_some() && self.baseline.is_some()
    }

    /// Residual meter current in A subtracted from every current reading.
    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    /// Open the bench (if not open yet), reset the supplies and capture the baseline offset.
    /// Never fails: problems are reported through the returned status.
    pub async fn initialize_instruments(&mut self) -> InitStatus {
        match self.try_initialize().await {
            Ok(baseline) => {
                log::info!("Instruments initialized, baseline offset {} A", baseline);
                InitStatus::Ready { baseline }
            }
            Err(err) => {
                log::error!("Initialization failed: {}", err);
                InitStatus::Failed(err)
            }
        }
    }

    async fn try_initialize(&mut self) -> crate::Result<f64> {
        self.baseline = None;
        let mut bench = match self.bench.take() {
            Some(bench) => bench,
            None => Bench::open(self.manager.as_ref(), &self.config).await?,
        };
        match Self::reset(&mut bench).await {
            Ok(baseline) => {
                self.bench = Some(bench);
                self.baseline = Some(baseline);
                Ok(baseline)
            }
            Err(err) => {
                bench.close().await;
                Err(err)
            }
        }
    }

    async fn reset(bench: &mut Bench) -> crate::Result<f64> {
        bench.supply.write(SUPPLY_RESET).await?;
        bench.dimming.write(DIMMING_RESET).await?;
        bench.meter.write(METER_ZERO_CURRENT).await?;
        bench.meter.wait_complete().await?;
        bench.meter.read_float(METER_READ).await
    }

    /// Run the measurement sequence with the main supply set to `input`.
    ///
    /// Either all five channels are returned or exactly one error. If the sequence fails midway,
    /// both supply outputs are switched off before the error is returned.
    pub async fn measure_all(&mut self, input: InputVoltage) -> Result<MeasurementResult, MeasurementError> {
        let (bench, baseline) = match (self.bench.as_mut(), self.baseline) {
            (Some(bench), Some(baseline)) => (bench, baseline),
            _ => return Err(MeasurementError::new(Error::NotInitialized)),
        };
        log::info!("Measuring with {} V input", input);
        match Self::run_sequence(bench, input, baseline).await {
            Ok(result) => {
                log::info!("Measurement complete: {:?}", result);
                Ok(result)
            }
            Err(err) => {
                log::error!("Measurement failed: {}", err);
                if let Err(off) = bench.outputs_off().await {
                    log::warn!("Could not switch outputs off after failure: {}", off);
                }
                Err(MeasurementError::new(err))
            }
        }
    }

    async fn run_sequence(bench: &mut Bench, input: InputVoltage, baseline: f64) -> crate::Result<MeasurementResult> {
        bench.supply.write(&format!("VOLT {}; {}", input.volts(), OUTPUT_ON)).await?;
        bench.supply.wait_complete().await?;
        bench.dimming.write(OUTPUT_OFF).await?;

        bench.meter.write(METER_VOLTAGE).await?;
        bench.meter.wait_complete().await?;
        let voltage = bench.meter.read_float(METER_READ).await?;

        bench.meter.write(METER_CURRENT).await?;
        bench.meter.wait_complete().await?;
        let current_max = bench.meter.read_float(METER_READ).await? - baseline;

        bench.scope.write(SCOPE_FREQUENCY).await?;
        bench.scope.wait_complete().await?;
        let reply = bench.scope.query(SCOPE_VALUE).await?;
        let reply = reply.trim();
        let frequency = match scpi::first_number(reply) {
            Some(hz) => hz / 1000.0,
            None => {
                log::warn!("No frequency in oscilloscope reply `{}`, reporting 0 kHz", reply);
                0.0
            }
        };

        bench.dimming.write(OUTPUT_ON).await?;
        bench.dimming.wait_complete().await?;
        bench.meter.write(METER_CURRENT).await?;
        bench.meter.wait_complete().await?;
        let current_min = bench.meter.read_float(METER_READ).await? - baseline;
        let dim_voltage = bench.dimming.read_float(DIMMING_SENSE).await?;

        bench.outputs_off().await?;

        Ok(MeasurementResult {
            voltage,
            current_max: current_max * 1000.0,
            current_min: current_min * 1000.0,
            dim_voltage,
            frequency,
        })
    }

    /// Switch the supplies off and close all sessions. The controller needs to be initialized
    /// again afterwards.
    pub async fn shutdown(&mut self) {
        self.baseline = None;
        if let Some(mut bench) = self.bench.take() {
            if let Err(err) = bench.outputs_off().await {
                log::warn!("Could not switch outputs off: {}", err);
            }
            bench.close().await;
            log::info!("Instrument sessions closed");
        }
    }
}
