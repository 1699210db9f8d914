use crate::pipeline::scheduler::PollIntervals;
use crate::rpc::options::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::runtime::layout::SnapshotLayout;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Lag between a mainchain block and its reference becoming visible on the
/// sidechain.
pub const REFERENCE_DELAY: u64 = 6;
pub const DEFAULT_AUTOMAPPINGS_DIR: &str = "/app/horizen-migration/dump-scripts/automappings";
const TESTNET: &str = "testnet";

/// Heights the whole cutover is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotTarget {
    snapshot_height: u64,
    confirmation_depth: u64,
}

impl SnapshotTarget {
    pub fn new(snapshot_height: u64, confirmation_depth: u64) -> Result<Self> {
        if confirmation_depth < REFERENCE_DELAY {
            bail!(
                "confirmation depth must be at least {REFERENCE_DELAY}, got {confirmation_depth}"
            );
        }
        if snapshot_height.checked_add(confirmation_depth).is_none() {
            bail!("snapshot height {snapshot_height} plus confirmation depth overflows");
        }
        Ok(Self {
            snapshot_height,
            confirmation_depth,
        })
    }

    pub fn snapshot_height(&self) -> u64 {
        self.snapshot_height
    }

    pub fn confirmation_depth(&self) -> u64 {
        self.confirmation_depth
    }

    /// Mainchain height at which the snapshot block counts as confirmed.
    pub fn confirmation_height(&self) -> u64 {
        self.snapshot_height + self.confirmation_depth
    }

    pub fn reference_delay(&self) -> u64 {
        REFERENCE_DELAY
    }

    /// Sidechain reference height equivalent of [`Self::confirmation_height`].
    pub fn reference_target(&self) -> u64 {
        self.confirmation_height() - REFERENCE_DELAY
    }
}

/// Immutable orchestrator configuration, read once at startup.
///
/// Construct it through [`OrchestratorConfig::builder`] or
/// [`OrchestratorConfig::from_env`]; both validate before returning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    network: String,
    snapshot_root: PathBuf,
    target: SnapshotTarget,
    mainchain_container_prefix: String,
    mainchain_snapshot_file: String,
    mainchain_rpc_user: String,
    mainchain_rpc_password: String,
    mainchain_rpc_port: u16,
    sidechain_container_prefix: String,
    sidechain_snapshot_file: String,
    sidechain_stakes_file: String,
    genesis_sidechain_id: String,
    legacy_sidechain_id: Option<String>,
    sidechain_rest_port: u16,
    automappings_dir: PathBuf,
    debug: bool,
    force_new_snapshot: bool,
    force_reseed: bool,
    skip_total_balance_check: bool,
    rpc_timeout: Duration,
    poll_intervals: PollIntervals,
}

impl OrchestratorConfig {
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    ///
    /// `DEBUG`, `FORCE_NEW_SNAPSHOT`, `FORCE_RESEED` and
    /// `SKIP_CHECK_TOTAL_BALANCE_FROM_ZEND` are enabled by `true`, `1` or
    /// `yes` in any case, so `FORCE_RESEED=1` in debug mode does reset the
    /// reseed markers.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = EnvSource { lookup: &lookup };

        let mut builder = Self::builder()
            .network(vars.required("NETWORK")?)
            .snapshot_root(vars.required("SNAPSHOT_PATH_CONTAINER")?)
            .snapshot_height(vars.required_parsed("ZEND_SNAPSHOT_BLOCK_HEIGHT")?)
            .confirmation_depth(vars.required_parsed("ZEND_SNAPSHOT_BLOCK_HEIGHT_MIN_CONF")?)
            .mainchain_container_prefix(vars.required("ZEND_CONTAINER_NAME_PREFIX")?)
            .mainchain_snapshot_file(vars.required("ZEND_SNAPSHOT_FILE")?)
            .mainchain_rpc_user(vars.required("ZEN_RPC_USER")?)
            .mainchain_rpc_password(vars.required("ZEN_RPC_PASSWORD")?)
            .mainchain_rpc_port(vars.required_parsed("ZEN_RPC_PORT")?)
            .sidechain_container_prefix(vars.required("EVMAPP_CONTAINER_NAME_PREFIX")?)
            .sidechain_snapshot_file(vars.required("EVMAPP_SNAPSHOT_FILE")?)
            .sidechain_stakes_file(vars.required("EVMAPP_STAKES_FILE")?)
            .genesis_sidechain_id(vars.required("SCNODE_GENESIS_SCID")?)
            .sidechain_rest_port(vars.required_parsed("SCNODE_REST_PORT")?)
            .debug(vars.flag("DEBUG"))
            .force_new_snapshot(vars.flag("FORCE_NEW_SNAPSHOT"))
            .force_reseed(vars.flag("FORCE_RESEED"))
            .skip_total_balance_check(vars.flag("SKIP_CHECK_TOTAL_BALANCE_FROM_ZEND"));

        if let Some(scid) = vars.optional("PREGOBI_SCID") {
            builder = builder.legacy_sidechain_id(scid);
        }
        if let Some(dir) = vars.optional("AUTOMAPPINGS_DIR") {
            builder = builder.automappings_dir(dir);
        }
        if let Some(secs) = vars.optional_parsed::<u64>("RPC_TIMEOUT_SECS")? {
            builder = builder.rpc_timeout(Duration::from_secs(secs));
        }

        let defaults = PollIntervals::default();
        builder = builder.poll_intervals(PollIntervals {
            far: vars.seconds_or("POLL_FAR_SECS", defaults.far)?,
            near: vars.seconds_or("POLL_NEAR_SECS", defaults.near)?,
            imminent: vars.seconds_or("POLL_IMMINENT_SECS", defaults.imminent)?,
        });

        builder.build()
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn is_testnet(&self) -> bool {
        self.network == TESTNET
    }

    /// Label used by the sidechain deployment for this network.
    pub fn sidechain_network(&self) -> &'static str {
        if self.is_testnet() {
            "gobi"
        } else {
            "eon"
        }
    }

    pub fn snapshot_root(&self) -> &PathBuf {
        &self.snapshot_root
    }

    pub fn target(&self) -> SnapshotTarget {
        self.target
    }

    pub fn mainchain_container(&self) -> String {
        format!("{}-{}", self.mainchain_container_prefix, self.network)
    }

    pub fn sidechain_container(&self) -> String {
        format!("{}-{}", self.sidechain_container_prefix, self.network)
    }

    pub fn mainchain_rpc_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.mainchain_container(),
            self.mainchain_rpc_port
        )
    }

    pub fn mainchain_rpc_user(&self) -> &str {
        &self.mainchain_rpc_user
    }

    pub fn mainchain_rpc_password(&self) -> &str {
        &self.mainchain_rpc_password
    }

    /// Root URL of the sidechain node; REST routes and `/ethv1` hang off it.
    pub fn sidechain_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.sidechain_container(),
            self.sidechain_rest_port
        )
    }

    pub fn genesis_sidechain_id(&self) -> &str {
        &self.genesis_sidechain_id
    }

    /// Sidechain ids whose mainchain balance is captured with the snapshot.
    pub fn balance_sidechain_ids(&self) -> Vec<String> {
        let mut ids = vec![self.genesis_sidechain_id.clone()];
        if self.is_testnet() {
            ids.extend(self.legacy_sidechain_id.clone());
        }
        ids
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Honoured only in debug mode.
    pub fn force_new_snapshot(&self) -> bool {
        self.debug && self.force_new_snapshot
    }

    /// Honoured only in debug mode.
    pub fn force_reseed(&self) -> bool {
        self.debug && self.force_reseed
    }

    /// Honoured only in debug mode.
    pub fn skip_total_balance_check(&self) -> bool {
        self.debug && self.skip_total_balance_check
    }

    /// Operator flags that were set but are ignored because debug mode is off.
    pub fn ignored_debug_flags(&self) -> Vec<&'static str> {
        if self.debug {
            return Vec::new();
        }
        [
            ("FORCE_NEW_SNAPSHOT", self.force_new_snapshot),
            ("FORCE_RESEED", self.force_reseed),
            (
                "SKIP_CHECK_TOTAL_BALANCE_FROM_ZEND",
                self.skip_total_balance_check,
            ),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect()
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    pub fn poll_intervals(&self) -> PollIntervals {
        self.poll_intervals
    }

    pub fn layout(&self) -> SnapshotLayout {
        SnapshotLayout::new(
            self.snapshot_root.clone(),
            &self.mainchain_snapshot_file,
            &self.sidechain_snapshot_file,
            &self.sidechain_stakes_file,
            self.automappings_dir.join(format!("{}.json", self.network)),
        )
    }

    pub fn validate(&self) -> Result<()> {
        ensure_not_empty(&self.network, "network")?;
        ensure_not_empty(&self.mainchain_container_prefix, "mainchain_container_prefix")?;
        ensure_not_empty(&self.mainchain_snapshot_file, "mainchain_snapshot_file")?;
        ensure_not_empty(&self.mainchain_rpc_user, "mainchain_rpc_user")?;
        ensure_not_empty(&self.mainchain_rpc_password, "mainchain_rpc_password")?;
        ensure_not_empty(&self.sidechain_container_prefix, "sidechain_container_prefix")?;
        ensure_not_empty(&self.sidechain_snapshot_file, "sidechain_snapshot_file")?;
        ensure_not_empty(&self.sidechain_stakes_file, "sidechain_stakes_file")?;
        ensure_not_empty(&self.genesis_sidechain_id, "genesis_sidechain_id")?;

        if self.snapshot_root.as_os_str().is_empty() {
            bail!("snapshot_root cannot be empty");
        }

        if self.is_testnet()
            && self
                .legacy_sidechain_id
                .as_deref()
                .map_or(true, |id| id.trim().is_empty())
        {
            bail!("legacy_sidechain_id (PREGOBI_SCID) is required on testnet");
        }

        if self.mainchain_rpc_port == 0 {
            bail!("mainchain_rpc_port must be greater than 0");
        }

        if self.sidechain_rest_port == 0 {
            bail!("sidechain_rest_port must be greater than 0");
        }

        if self.rpc_timeout.is_zero() {
            bail!("rpc_timeout must be greater than 0");
        }

        if self.poll_intervals.far.is_zero()
            || self.poll_intervals.near.is_zero()
            || self.poll_intervals.imminent.is_zero()
        {
            bail!("poll intervals must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct OrchestratorConfigBuilder {
    network: Option<String>,
    snapshot_root: Option<PathBuf>,
    snapshot_height: Option<u64>,
    confirmation_depth: Option<u64>,
    mainchain_container_prefix: Option<String>,
    mainchain_snapshot_file: Option<String>,
    mainchain_rpc_user: Option<String>,
    mainchain_rpc_password: Option<String>,
    mainchain_rpc_port: Option<u16>,
    sidechain_container_prefix: Option<String>,
    sidechain_snapshot_file: Option<String>,
    sidechain_stakes_file: Option<String>,
    genesis_sidechain_id: Option<String>,
    legacy_sidechain_id: Option<String>,
    sidechain_rest_port: Option<u16>,
    automappings_dir: Option<PathBuf>,
    debug: bool,
    force_new_snapshot: bool,
    force_reseed: bool,
    skip_total_balance_check: bool,
    rpc_timeout: Option<Duration>,
    poll_intervals: Option<PollIntervals>,
}

impl OrchestratorConfigBuilder {
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn snapshot_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.snapshot_root = Some(root.into());
        self
    }

    pub fn snapshot_height(mut self, height: u64) -> Self {
        self.snapshot_height = Some(height);
        self
    }

    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.confirmation_depth = Some(depth);
        self
    }

    pub fn mainchain_container_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.mainchain_container_prefix = Some(prefix.into());
        self
    }

    pub fn mainchain_snapshot_file(mut self, file: impl Into<String>) -> Self {
        self.mainchain_snapshot_file = Some(file.into());
        self
    }

    pub fn mainchain_rpc_user(mut self, user: impl Into<String>) -> Self {
        self.mainchain_rpc_user = Some(user.into());
        self
    }

    pub fn mainchain_rpc_password(mut self, password: impl Into<String>) -> Self {
        self.mainchain_rpc_password = Some(password.into());
        self
    }

    pub fn mainchain_rpc_port(mut self, port: u16) -> Self {
        self.mainchain_rpc_port = Some(port);
        self
    }

    pub fn sidechain_container_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sidechain_container_prefix = Some(prefix.into());
        self
    }

    pub fn sidechain_snapshot_file(mut self, file: impl Into<String>) -> Self {
        self.sidechain_snapshot_file = Some(file.into());
        self
    }

    pub fn sidechain_stakes_file(mut self, file: impl Into<String>) -> Self {
        self.sidechain_stakes_file = Some(file.into());
        self
    }

    pub fn genesis_sidechain_id(mut self, scid: impl Into<String>) -> Self {
        self.genesis_sidechain_id = Some(scid.into());
        self
    }

    pub fn legacy_sidechain_id(mut self, scid: impl Into<String>) -> Self {
        self.legacy_sidechain_id = Some(scid.into());
        self
    }

    pub fn sidechain_rest_port(mut self, port: u16) -> Self {
        self.sidechain_rest_port = Some(port);
        self
    }

    pub fn automappings_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.automappings_dir = Some(dir.into());
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    pub fn force_new_snapshot(mut self, enabled: bool) -> Self {
        self.force_new_snapshot = enabled;
        self
    }

    pub fn force_reseed(mut self, enabled: bool) -> Self {
        self.force_reseed = enabled;
        self
    }

    pub fn skip_total_balance_check(mut self, enabled: bool) -> Self {
        self.skip_total_balance_check = enabled;
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    pub fn poll_intervals(mut self, intervals: PollIntervals) -> Self {
        self.poll_intervals = Some(intervals);
        self
    }

    pub fn build(self) -> Result<OrchestratorConfig> {
        let target = SnapshotTarget::new(
            self.snapshot_height.context("snapshot_height is required")?,
            self.confirmation_depth
                .context("confirmation_depth is required")?,
        )?;

        let config = OrchestratorConfig {
            network: trimmed(self.network.context("network is required")?),
            snapshot_root: self.snapshot_root.context("snapshot_root is required")?,
            target,
            mainchain_container_prefix: trimmed(
                self.mainchain_container_prefix
                    .context("mainchain_container_prefix is required")?,
            ),
            mainchain_snapshot_file: trimmed(
                self.mainchain_snapshot_file
                    .context("mainchain_snapshot_file is required")?,
            ),
            mainchain_rpc_user: self
                .mainchain_rpc_user
                .context("mainchain_rpc_user is required")?,
            mainchain_rpc_password: self
                .mainchain_rpc_password
                .context("mainchain_rpc_password is required")?,
            mainchain_rpc_port: self
                .mainchain_rpc_port
                .context("mainchain_rpc_port is required")?,
            sidechain_container_prefix: trimmed(
                self.sidechain_container_prefix
                    .context("sidechain_container_prefix is required")?,
            ),
            sidechain_snapshot_file: trimmed(
                self.sidechain_snapshot_file
                    .context("sidechain_snapshot_file is required")?,
            ),
            sidechain_stakes_file: trimmed(
                self.sidechain_stakes_file
                    .context("sidechain_stakes_file is required")?,
            ),
            genesis_sidechain_id: trimmed(
                self.genesis_sidechain_id
                    .context("genesis_sidechain_id is required")?,
            ),
            legacy_sidechain_id: self.legacy_sidechain_id.map(trimmed),
            sidechain_rest_port: self
                .sidechain_rest_port
                .context("sidechain_rest_port is required")?,
            automappings_dir: self
                .automappings_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_AUTOMAPPINGS_DIR)),
            debug: self.debug,
            force_new_snapshot: self.force_new_snapshot,
            force_reseed: self.force_reseed,
            skip_total_balance_check: self.skip_total_balance_check,
            rpc_timeout: self
                .rpc_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
            poll_intervals: self.poll_intervals.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}

struct EnvSource<'a, F> {
    lookup: &'a F,
}

impl<F> EnvSource<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, name: &str) -> Result<String> {
        self.optional(name)
            .with_context(|| format!("environment variable {name} is not set or empty"))
    }

    fn required_parsed<T>(&self, name: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        let raw = self.required(name)?;
        raw.parse()
            .with_context(|| format!("environment variable {name} has invalid value '{raw}'"))
    }

    fn optional_parsed<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.optional(name) {
            Some(raw) => raw
                .parse()
                .map(Some)
                .with_context(|| format!("environment variable {name} has invalid value '{raw}'")),
            None => Ok(None),
        }
    }

    fn seconds_or(&self, name: &str, default: Duration) -> Result<Duration> {
        Ok(self
            .optional_parsed::<u64>(name)?
            .map(Duration::from_secs)
            .unwrap_or(default))
    }

    /// `true`, `1` and `yes` enable a flag, in any case. Anything else,
    /// including `false` or an empty value, leaves it off.
    fn flag(&self, name: &str) -> bool {
        self.optional(name)
            .map(|value| matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false)
    }
}

fn trimmed(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}
