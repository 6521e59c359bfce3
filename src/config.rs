use std::collections::HashSet;
use std::path::Path;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::indicator::engine::{IndicatorEngine, IndicatorSettings};
use crate::model::TimeFrame;
use crate::position::bucket::BucketFractions;
use crate::position::rules::{LegacyRule, StopLoss};
use crate::strategy::{ScoreWeights, SignalParams, SignalRule};

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_data_dir() -> String {
    "./data".into()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_settle_wait_secs() -> u64 {
    10
}

fn default_candle_count() -> usize {
    100
}

fn default_retention() -> usize {
    crate::series::DEFAULT_RETENTION
}

fn default_timeframe() -> TimeFrame {
    TimeFrame::Min5
}

fn default_min_order_krw() -> f64 {
    5_000.0
}

fn default_status_report_minutes() -> Vec<u32> {
    vec![0, 30]
}

fn default_fee_bps() -> f64 {
    5.0
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub general: GeneralConfig,
    #[serde(default)]
    pub upbit: UpbitConfig,
    pub slack: Option<SlackConfig>,
    #[serde(default)]
    pub coins: Vec<String>,
    #[serde(default)]
    pub indicators: IndicatorSettings,
    #[serde(default)]
    pub strategy: StrategyConfig,
    pub backtest: Option<BacktestConfig>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Pause between placing an order and reading its fills.
    #[serde(default = "default_settle_wait_secs")]
    pub settle_wait_secs: u64,
    /// Bars fetched per instrument each cycle.
    #[serde(default = "default_candle_count")]
    pub candle_count: usize,
    #[serde(default = "default_retention")]
    pub retention: usize,
    #[serde(default = "default_timeframe")]
    pub timeframe: TimeFrame,
    #[serde(default = "default_min_order_krw")]
    pub min_order_krw: f64,
    /// Minutes past the hour (local time) at which the asset report is sent.
    #[serde(default = "default_status_report_minutes")]
    pub status_report_minutes: Vec<u32>,
    /// Exchange trading fee. Reserved on top of every buy and charged by the
    /// simulated exchange in dry runs.
    #[serde(default = "default_fee_bps")]
    pub fee_bps: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpbitConfig {
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
}

#[derive(Debug, Deserialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub token: String,
    pub trade_channel: String,
    pub asset_channel: String,
    pub error_channel: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    #[default]
    Market,
    Limit,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub rule: SignalRule,
    pub oversold: f64,
    pub overbought: f64,
    pub min_profit_rate: f64,
    pub require_reversal: bool,
    pub require_bollinger: bool,
    pub legacy_rsi: f64,
    pub legacy_min_profit_rate: f64,
    pub stop_loss_factor: f64,
    pub order_type: OrderType,
    /// Limit buys are priced at `price * (1 + limit_premium)`.
    pub limit_premium: f64,
    pub limit_wait_secs: u64,
    pub bucket_fractions: BucketFractions,
    pub score_weights: ScoreWeights,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        let signal = SignalParams::default();
        let legacy = LegacyRule::default();
        Self {
            rule: signal.rule,
            oversold: signal.oversold,
            overbought: signal.overbought,
            min_profit_rate: signal.min_profit_rate,
            require_reversal: signal.require_reversal,
            require_bollinger: signal.require_bollinger,
            legacy_rsi: legacy.min_rsi,
            legacy_min_profit_rate: legacy.min_profit_rate,
            stop_loss_factor: StopLoss::default().factor,
            order_type: OrderType::Market,
            limit_premium: 0.005,
            limit_wait_secs: 10,
            bucket_fractions: BucketFractions::default(),
            score_weights: signal.weights,
        }
    }
}

impl StrategyConfig {
    pub fn signal_params(&self) -> SignalParams {
        SignalParams {
            rule: self.rule,
            weights: self.score_weights,
            oversold: self.oversold,
            overbought: self.overbought,
            min_profit_rate: self.min_profit_rate,
            require_reversal: self.require_reversal,
            require_bollinger: self.require_bollinger,
        }
    }

    pub fn legacy_rule(&self) -> LegacyRule {
        LegacyRule {
            min_rsi: self.legacy_rsi,
            min_profit_rate: self.legacy_min_profit_rate,
        }
    }

    pub fn stop_loss(&self) -> StopLoss {
        StopLoss {
            factor: self.stop_loss_factor,
        }
    }
}

fn default_backtest_candles() -> usize {
    2_000
}

fn default_initial_capital() -> f64 {
    1_000_000.0
}

fn default_backtest_fee_bps() -> f64 {
    5.0
}

#[derive(Debug, Deserialize)]
pub struct BacktestConfig {
    pub symbol: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: TimeFrame,
    #[serde(default = "default_backtest_candles")]
    pub candles: usize,
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
    #[serde(default = "default_backtest_fee_bps")]
    pub fee_bps: f64,
}

/// Load and validate an `AppConfig` from a TOML file at `path`.
///
/// Secrets given in the environment override the file.
pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let mut config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    apply_env(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;

    Ok(config)
}

fn apply_env(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(key) = lookup("UPBIT_ACCESS_KEY") {
        config.upbit.access_key = key;
    }
    if let Some(key) = lookup("UPBIT_SECRET_KEY") {
        config.upbit.secret_key = key;
    }
    if let (Some(slack), Some(token)) = (config.slack.as_mut(), lookup("SLACK_API_TOKEN")) {
        slack.token = token;
    }
}

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_general(config)?;
    validate_coins(config)?;
    validate_indicators(config)?;
    validate_strategy(config)?;
    validate_slack(config)?;
    validate_backtest(config)?;
    Ok(())
}

fn validate_general(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let general = &config.general;
    if !matches!(general.log_format.as_str(), "text" | "json") {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "general.log_format \"{}\" must be \"text\" or \"json\"",
                general.log_format
            ),
        }));
    }
    if general.poll_interval_secs == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "general.poll_interval_secs must be > 0".into(),
        }));
    }
    if general.candle_count > general.retention {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "general.candle_count ({}) exceeds general.retention ({})",
                general.candle_count, general.retention
            ),
        }));
    }
    if let Some(minute) = general.status_report_minutes.iter().find(|&&m| m >= 60) {
        return Err(Report::new(ConfigError::Validation {
            field: format!("general.status_report_minutes: {minute} is not a minute of the hour"),
        }));
    }
    if general.min_order_krw.is_nan() || general.min_order_krw < 0.0 {
        return Err(Report::new(ConfigError::Validation {
            field: "general.min_order_krw must be >= 0".into(),
        }));
    }
    if !(0.0..1_000.0).contains(&general.fee_bps) {
        return Err(Report::new(ConfigError::Validation {
            field: format!("general.fee_bps ({}) must be within [0, 1000)", general.fee_bps),
        }));
    }
    Ok(())
}

fn validate_coins(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let mut seen = HashSet::new();
    for coin in &config.coins {
        let well_formed = coin
            .split_once('-')
            .is_some_and(|(quote, base)| quote == "KRW" && !base.is_empty());
        if !well_formed {
            return Err(Report::new(ConfigError::Validation {
                field: format!("coins: \"{coin}\" is not a KRW market (e.g. \"KRW-BTC\")"),
            }));
        }
        if !seen.insert(coin.as_str()) {
            return Err(Report::new(ConfigError::Validation {
                field: format!("coins: duplicate market \"{coin}\""),
            }));
        }
    }
    Ok(())
}

fn validate_indicators(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let engine = IndicatorEngine::new(&config.indicators).change_context(ConfigError::Validation {
        field: "indicators".into(),
    })?;
    if config.general.candle_count < engine.required_candles() {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "general.candle_count ({}) is below the {} bars RSI needs",
                config.general.candle_count,
                engine.required_candles()
            ),
        }));
    }
    Ok(())
}

fn validate_strategy(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let strategy = &config.strategy;
    strategy.signal_params().validate()?;
    strategy.bucket_fractions.validate()?;
    if strategy.stop_loss_factor.is_nan()
        || strategy.stop_loss_factor <= 0.0
        || strategy.stop_loss_factor > 1.0
    {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "strategy.stop_loss_factor ({}) must be within (0, 1]",
                strategy.stop_loss_factor
            ),
        }));
    }
    if strategy.limit_premium.is_nan() || strategy.limit_premium < 0.0 {
        return Err(Report::new(ConfigError::Validation {
            field: "strategy.limit_premium must be >= 0".into(),
        }));
    }
    Ok(())
}

fn validate_slack(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let Some(slack) = &config.slack else {
        return Ok(());
    };
    if slack.token.is_empty() {
        return Err(Report::new(ConfigError::Validation {
            field: "slack.token is empty (set it in the file or SLACK_API_TOKEN)".into(),
        }));
    }
    Ok(())
}

fn validate_backtest(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let Some(backtest) = &config.backtest else {
        return Ok(());
    };
    if backtest.initial_capital.is_nan() || backtest.initial_capital <= 0.0 {
        return Err(Report::new(ConfigError::Validation {
            field: "backtest.initial_capital must be > 0".into(),
        }));
    }
    if backtest.fee_bps.is_nan() || backtest.fee_bps < 0.0 {
        return Err(Report::new(ConfigError::Validation {
            field: "backtest.fee_bps must be >= 0".into(),
        }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> AppConfig {
        toml::from_str(toml).expect("parse failed")
    }

    #[test]
    fn valid_full_config_parses() {
        let toml = r#"
coins = ["KRW-BTC", "KRW-ETH"]

[general]
log_level = "debug"
log_format = "json"
data_dir = "/tmp/data"
poll_interval_secs = 5
timeframe = "1m"
status_report_minutes = [0, 15, 30, 45]

[upbit]
access_key = "a"
secret_key = "s"

[slack]
token = "xoxb"
trade_channel = "C1"
asset_channel = "C2"
error_channel = "C3"

[indicators]
rsi_period = 10
bollinger_deviation = "population"

[strategy]
oversold = 30.0
order_type = "limit"

[strategy.bucket_fractions]
b20 = 0.2
b25 = 0.4
b30 = 0.3
b35 = 0.1

[backtest]
symbol = "KRW-BTC"
candles = 500
"#;
        let config = parse(toml);
        assert!(validate(&config).is_ok());
        assert_eq!(config.general.timeframe, TimeFrame::Min1);
        assert_eq!(config.coins.len(), 2);
        assert_eq!(config.indicators.rsi_period, 10);
        assert_eq!(config.indicators.bollinger_period, 20);
        assert_eq!(config.strategy.order_type, OrderType::Limit);
        assert_eq!(config.strategy.oversold, 30.0);
        assert_eq!(config.strategy.overbought, 65.0);
        assert_eq!(config.strategy.bucket_fractions.b25, 0.4);
        assert_eq!(config.backtest.unwrap().timeframe, TimeFrame::Min5);
    }

    #[test]
    fn defaults_applied_when_fields_omitted() {
        let config = parse("[general]\n");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "text");
        assert_eq!(config.general.data_dir, "./data");
        assert_eq!(config.general.settle_wait_secs, 10);
        assert_eq!(config.general.retention, 200);
        assert_eq!(config.general.min_order_krw, 5_000.0);
        assert_eq!(config.general.status_report_minutes, vec![0, 30]);
        assert!(config.slack.is_none());
        assert!(config.coins.is_empty());
        assert_eq!(config.strategy.stop_loss_factor, 0.9);
        assert!(config.strategy.require_reversal);
        assert_eq!(config.strategy.rule, SignalRule::RsiReversal);
        assert_eq!(config.general.fee_bps, 5.0);
        assert_eq!(config.strategy.bucket_fractions, BucketFractions::default());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn invalid_timeframe_string_rejected() {
        let toml = r#"
[general]
timeframe = "2m"
"#;
        assert!(toml::from_str::<AppConfig>(toml).is_err());
    }

    #[test]
    fn malformed_coin_rejected() {
        let config = parse("coins = [\"BTC\"]\n[general]\n");
        assert!(validate(&config).is_err());
        let config = parse("coins = [\"KRW-BTC\", \"KRW-BTC\"]\n[general]\n");
        assert!(validate(&config).is_err());
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let toml = r#"
[general]

[strategy]
oversold = 70.0
overbought = 30.0
"#;
        assert!(validate(&parse(toml)).is_err());
    }

    #[test]
    fn oversized_bucket_fractions_rejected() {
        let toml = r#"
[general]

[strategy.bucket_fractions]
b20 = 0.9
"#;
        assert!(validate(&parse(toml)).is_err());
    }

    #[test]
    fn weighted_score_rule_parses() {
        let toml = r#"
[general]

[strategy]
rule = "weighted_score"

[strategy.score_weights]
bollinger = 2.0
threshold = 0.5
"#;
        let config = parse(toml);
        assert!(validate(&config).is_ok());
        let params = config.strategy.signal_params();
        assert_eq!(params.rule, SignalRule::WeightedScore);
        assert_eq!(params.weights.bollinger, 2.0);
        assert_eq!(params.weights.ema, 1.0);
        assert_eq!(params.weights.rsi_low, 30.0);

        let bad = "[general]

[strategy.score_weights]
threshold = 1.5
";
        assert!(validate(&parse(bad)).is_err());
        assert!(toml::from_str::<AppConfig>("[general]
[strategy]
rule = \"macd\"
").is_err());
    }

    #[test]
    fn negative_fee_rejected() {
        assert!(validate(&parse("[general]
fee_bps = -1.0
")).is_err());
    }

    #[test]
    fn too_few_candles_for_rsi_rejected() {
        let toml = r#"
[general]
candle_count = 10
"#;
        assert!(validate(&parse(toml)).is_err());
    }

    #[test]
    fn bad_indicator_settings_rejected() {
        let toml = r#"
[general]

[indicators]
ema_short = 30
ema_long = 20
"#;
        assert!(validate(&parse(toml)).is_err());
    }

    #[test]
    fn environment_overrides_secrets() {
        let toml = r#"
[general]

[upbit]
access_key = "from-file"

[slack]
trade_channel = "C1"
asset_channel = "C2"
error_channel = "C3"
"#;
        let mut config = parse(toml);
        assert!(validate(&config).is_err());

        apply_env(&mut config, |key| match key {
            "UPBIT_SECRET_KEY" => Some("env-secret".into()),
            "SLACK_API_TOKEN" => Some("env-token".into()),
            _ => None,
        });
        assert_eq!(config.upbit.access_key, "from-file");
        assert_eq!(config.upbit.secret_key, "env-secret");
        assert_eq!(config.slack.as_ref().unwrap().token, "env-token");
        assert!(validate(&config).is_ok());
    }
}
