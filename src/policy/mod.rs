//! Policy evaluator: pure decisions about sizing, symbol translation,
//! direction, and filtering.
//!
//! Nothing in this module performs I/O. The driver builds one immutable
//! `CopyPolicy` per tick from the settings store and threads it through the
//! planner, so a mid-tick settings update never produces a half-applied
//! policy.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::CopyError;
use crate::models::TradeDirection;

/// How receiver volume is derived from provider volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizingMode {
    /// Copy the provider volume unchanged
    Same,
    /// Always use the configured fixed lot
    Fixed,
    /// Provider volume times a configured multiplier
    Multiplier,
    /// Provider volume scaled by receiver/provider balance ratio
    Ratio,
    /// Balance-at-risk divided by a fixed constant. This is the source
    /// system's simplified linear proxy, not an instrument-aware risk
    /// model; preserved for compatibility.
    Risk,
}

impl SizingMode {
    /// Unknown strings fall back to `Same`, matching the source behaviour
    /// of passing the provider volume through untouched.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "fixed" => Self::Fixed,
            "multiplier" => Self::Multiplier,
            "ratio" => Self::Ratio,
            "risk" => Self::Risk,
            "same" => Self::Same,
            _ => Self::Same,
        }
    }
}

/// An explicit symbol rename entry. An empty broker acts as a wildcard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolMapping {
    pub provider_symbol: String,
    pub receiver_symbol: String,
    pub broker: String,
}

impl SymbolMapping {
    fn matches(&self, symbol: &str, receiver_broker: &str) -> bool {
        self.provider_symbol == symbol
            && (self.broker.is_empty() || self.broker == receiver_broker)
    }
}

/// Immutable per-tick copy policy derived from the settings store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyPolicy {
    pub mode: SizingMode,
    pub multiplier: Decimal,
    pub fixed_lot: Decimal,
    pub risk_percent: Decimal,
    pub min_lot: Decimal,
    pub max_lot: Decimal,

    pub symbol_prefix: String,
    pub symbol_suffix: String,
    /// Explicit renames consulted before prefix/suffix; table order is the
    /// tie-break, first match wins
    pub mappings: Vec<SymbolMapping>,

    pub copy_buy: bool,
    pub copy_sell: bool,
    pub copy_pending: bool,
    pub opposite_trades: bool,
    pub close_on_provider_close: bool,

    /// Empty list means no allow-list is configured
    pub allowed_symbols: Vec<String>,
    pub blocked_symbols: Vec<String>,

    pub magic_number: i64,
    pub copy_interval_ms: u64,

    /// Set when a settings value failed to parse. The planner refuses to
    /// size new trades from a defective policy and emits
    /// `Skip(InvalidPolicy)` instead; already-copied trades are unaffected.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub invalid: Option<String>,
}

impl Default for CopyPolicy {
    fn default() -> Self {
        Self {
            mode: SizingMode::Multiplier,
            multiplier: dec!(1.0),
            fixed_lot: dec!(0.01),
            risk_percent: dec!(1.0),
            min_lot: dec!(0.01),
            max_lot: dec!(100.0),
            symbol_prefix: String::new(),
            symbol_suffix: String::new(),
            mappings: Vec::new(),
            copy_buy: true,
            copy_sell: true,
            copy_pending: true,
            opposite_trades: false,
            close_on_provider_close: true,
            allowed_symbols: Vec::new(),
            blocked_symbols: Vec::new(),
            magic_number: 123_456,
            copy_interval_ms: 500,
            invalid: None,
        }
    }
}

impl CopyPolicy {
    /// Build a policy from the raw key/value settings plus the symbol
    /// mapping table.
    ///
    /// Malformed numeric values do not abort the tick: the field keeps its
    /// default and the policy is marked invalid, which downgrades every
    /// would-be `Open` to `Skip(InvalidPolicy)`.
    pub fn from_settings(
        settings: &HashMap<String, String>,
        mappings: Vec<SymbolMapping>,
    ) -> Self {
        let mut policy = CopyPolicy {
            mappings,
            ..CopyPolicy::default()
        };
        let mut invalid: Option<String> = None;

        let mut read_decimal = |key: &str, slot: &mut Decimal| {
            if let Some(raw) = settings.get(key) {
                match raw.trim().parse::<Decimal>() {
                    Ok(v) => *slot = v,
                    Err(_) => {
                        if invalid.is_none() {
                            invalid = Some(format!("{key}={raw:?} is not a number"));
                        }
                    }
                }
            }
        };

        read_decimal("lot_multiplier", &mut policy.multiplier);
        read_decimal("fixed_lot", &mut policy.fixed_lot);
        read_decimal("risk_percent", &mut policy.risk_percent);
        read_decimal("min_lot", &mut policy.min_lot);
        read_decimal("max_lot", &mut policy.max_lot);

        if let Some(raw) = settings.get("lot_mode") {
            policy.mode = SizingMode::parse(raw);
        }

        let read_bool = |key: &str, default: bool| -> bool {
            settings
                .get(key)
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(default)
        };
        policy.copy_buy = read_bool("copy_buy", policy.copy_buy);
        policy.copy_sell = read_bool("copy_sell", policy.copy_sell);
        policy.copy_pending = read_bool("copy_pending", policy.copy_pending);
        policy.opposite_trades = read_bool("opposite_trades", policy.opposite_trades);
        policy.close_on_provider_close =
            read_bool("close_on_provider_close", policy.close_on_provider_close);

        if let Some(raw) = settings.get("symbol_prefix") {
            policy.symbol_prefix = raw.trim().to_string();
        }
        if let Some(raw) = settings.get("symbol_suffix") {
            policy.symbol_suffix = raw.trim().to_string();
        }

        policy.allowed_symbols = parse_symbol_list(settings.get("allowed_symbols"));
        policy.blocked_symbols = parse_symbol_list(settings.get("blocked_symbols"));

        if let Some(raw) = settings.get("magic_number") {
            match raw.trim().parse::<i64>() {
                Ok(v) => policy.magic_number = v,
                Err(_) => {
                    if invalid.is_none() {
                        invalid = Some(format!("magic_number={raw:?} is not an integer"));
                    }
                }
            }
        }
        if let Some(raw) = settings.get("copy_interval") {
            match raw.trim().parse::<u64>() {
                Ok(v) => policy.copy_interval_ms = v,
                Err(_) => {
                    if invalid.is_none() {
                        invalid = Some(format!("copy_interval={raw:?} is not an integer"));
                    }
                }
            }
        }

        policy.invalid = invalid;
        policy
    }

    /// Translate a provider symbol into the receiver broker's symbol.
    ///
    /// The explicit mapping table is consulted first: an entry matches when
    /// its provider symbol equals `symbol` and its broker equals
    /// `receiver_broker` or is the empty wildcard. First match in table
    /// order wins. Without a match the prefix/suffix fallback applies.
    pub fn resolve_symbol(&self, symbol: &str, receiver_broker: &str) -> String {
        for mapping in &self.mappings {
            if mapping.matches(symbol, receiver_broker) {
                return mapping.receiver_symbol.clone();
            }
        }
        format!("{}{}{}", self.symbol_prefix, symbol, self.symbol_suffix)
    }

    /// Size the receiver volume from the provider volume and both balances,
    /// then clamp into `[min_lot, max_lot]`. The clamp applies after every
    /// mode, including `Same`.
    pub fn sized_volume(
        &self,
        provider_volume: Decimal,
        provider_balance: Decimal,
        receiver_balance: Decimal,
    ) -> Decimal {
        let volume = match self.mode {
            SizingMode::Same => provider_volume,
            SizingMode::Fixed => self.fixed_lot,
            SizingMode::Multiplier => provider_volume * self.multiplier,
            SizingMode::Ratio => {
                if provider_balance > Decimal::ZERO {
                    provider_volume * (receiver_balance / provider_balance)
                } else {
                    provider_volume
                }
            }
            SizingMode::Risk => {
                (receiver_balance * self.risk_percent / dec!(100)) / dec!(1000)
            }
        };

        volume.max(self.min_lot).min(self.max_lot)
    }

    /// Whether a provider trade passes the direction and symbol filters.
    ///
    /// The allow-list and block-list are independent; when a symbol appears
    /// in both, the block-list wins.
    pub fn should_copy(&self, direction: TradeDirection, symbol: &str) -> bool {
        if direction.is_sell_side() {
            if !self.copy_sell {
                return false;
            }
        } else if !self.copy_buy {
            return false;
        }

        if !self.allowed_symbols.is_empty()
            && !self.allowed_symbols.iter().any(|s| s == symbol)
        {
            return false;
        }

        if self.blocked_symbols.iter().any(|s| s == symbol) {
            return false;
        }

        true
    }

    /// The direction to place on the receiver: identity unless opposite
    /// trading is enabled, in which case each direction maps to its mirror.
    pub fn effective_direction(&self, direction: TradeDirection) -> TradeDirection {
        if self.opposite_trades {
            direction.opposite()
        } else {
            direction
        }
    }
}

/// Build the correlation tag embedded into the receiver trade's comment.
///
/// Round-trips through `copier::correlate::parse_tag`.
pub fn build_tag(provider_ticket: u64, opposite: bool) -> String {
    if opposite {
        format!("[TKT={provider_ticket}][OPPOSITE]")
    } else {
        format!("[TKT={provider_ticket}]")
    }
}

/// Check a settings value before it is stored. The engine tolerates bad
/// values at tick time by skipping trades, but rejecting them at write time
/// keeps the copier from silently going idle.
pub fn validate_setting(key: &str, value: &str) -> Result<(), CopyError> {
    match key {
        "lot_multiplier" | "fixed_lot" | "risk_percent" | "min_lot" | "max_lot" => {
            value
                .trim()
                .parse::<Decimal>()
                .map_err(|_| CopyError::Validation(format!("{key} must be a number, got {value:?}")))?;
        }
        "magic_number" | "copy_interval" => {
            value.trim().parse::<i64>().map_err(|_| {
                CopyError::Validation(format!("{key} must be an integer, got {value:?}"))
            })?;
        }
        "copy_buy" | "copy_sell" | "copy_pending" | "opposite_trades"
        | "close_on_provider_close" => {
            let v = value.trim().to_lowercase();
            if v != "true" && v != "false" {
                return Err(CopyError::Validation(format!(
                    "{key} must be true or false, got {value:?}"
                )));
            }
        }
        _ => {}
    }
    Ok(())
}

fn parse_symbol_list(raw: Option<&String>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CopyPolicy {
        CopyPolicy::default()
    }

    #[test]
    fn setting_validation() {
        assert!(validate_setting("lot_multiplier", "1.5").is_ok());
        assert!(validate_setting("lot_multiplier", "abc").is_err());
        assert!(validate_setting("copy_interval", "500").is_ok());
        assert!(validate_setting("copy_interval", "0.5").is_err());
        assert!(validate_setting("copy_buy", "false").is_ok());
        assert!(validate_setting("copy_buy", "yes").is_err());
        // Free-form keys (symbol lists, prefixes) are not checked
        assert!(validate_setting("allowed_symbols", "EURUSD,GBPUSD").is_ok());
    }

    #[test]
    fn multiplier_sizing_and_clamp() {
        let p = CopyPolicy {
            mode: SizingMode::Multiplier,
            multiplier: dec!(2.0),
            min_lot: dec!(0.01),
            max_lot: dec!(5.0),
            ..policy()
        };

        assert_eq!(p.sized_volume(dec!(1.2), dec!(10000), dec!(10000)), dec!(2.4));
        // 3.0 * 2.0 = 6.0, clamped to max_lot
        assert_eq!(p.sized_volume(dec!(3.0), dec!(10000), dec!(10000)), dec!(5.0));
    }

    #[test]
    fn clamp_applies_to_every_mode() {
        let modes = [
            SizingMode::Same,
            SizingMode::Fixed,
            SizingMode::Multiplier,
            SizingMode::Ratio,
            SizingMode::Risk,
        ];
        for mode in modes {
            let p = CopyPolicy {
                mode,
                min_lot: dec!(0.5),
                max_lot: dec!(2.0),
                fixed_lot: dec!(0.01),
                multiplier: dec!(100),
                risk_percent: dec!(0.001),
                ..policy()
            };
            let v = p.sized_volume(dec!(10), dec!(1000), dec!(1000));
            assert!(v >= dec!(0.5) && v <= dec!(2.0), "{mode:?} escaped clamp: {v}");
        }
    }

    #[test]
    fn same_mode_still_clamped() {
        let p = CopyPolicy {
            mode: SizingMode::Same,
            min_lot: dec!(0.10),
            max_lot: dec!(1.0),
            ..policy()
        };
        assert_eq!(p.sized_volume(dec!(0.01), dec!(1), dec!(1)), dec!(0.10));
    }

    #[test]
    fn ratio_sizing_falls_back_on_zero_balance() {
        let p = CopyPolicy {
            mode: SizingMode::Ratio,
            ..policy()
        };
        assert_eq!(p.sized_volume(dec!(1.0), dec!(5000), dec!(10000)), dec!(2.0));
        assert_eq!(p.sized_volume(dec!(1.0), dec!(0), dec!(10000)), dec!(1.0));
    }

    #[test]
    fn risk_sizing_uses_linear_proxy() {
        let p = CopyPolicy {
            mode: SizingMode::Risk,
            risk_percent: dec!(2.0),
            ..policy()
        };
        // (10000 * 2 / 100) / 1000 = 0.2
        assert_eq!(p.sized_volume(dec!(9.9), dec!(1), dec!(10000)), dec!(0.2));
    }

    #[test]
    fn explicit_mapping_beats_prefix_suffix() {
        let p = CopyPolicy {
            symbol_prefix: "m.".to_string(),
            mappings: vec![
                SymbolMapping {
                    provider_symbol: "XAUUSD".to_string(),
                    receiver_symbol: "GOLD".to_string(),
                    broker: "BrokerB".to_string(),
                },
                SymbolMapping {
                    provider_symbol: "XAUUSD".to_string(),
                    receiver_symbol: "XAUUSD.x".to_string(),
                    broker: String::new(),
                },
            ],
            ..policy()
        };

        // Broker-specific entry first in table order
        assert_eq!(p.resolve_symbol("XAUUSD", "BrokerB"), "GOLD");
        // Wildcard entry catches other brokers
        assert_eq!(p.resolve_symbol("XAUUSD", "BrokerC"), "XAUUSD.x");
        // No entry: prefix/suffix fallback
        assert_eq!(p.resolve_symbol("EURUSD", "BrokerB"), "m.EURUSD");
    }

    #[test]
    fn direction_toggles_filter_by_family() {
        let p = CopyPolicy {
            copy_buy: false,
            ..policy()
        };
        assert!(!p.should_copy(TradeDirection::Buy, "EURUSD"));
        assert!(!p.should_copy(TradeDirection::BuyStop, "EURUSD"));
        assert!(p.should_copy(TradeDirection::Sell, "EURUSD"));
        assert!(p.should_copy(TradeDirection::SellLimit, "EURUSD"));
    }

    #[test]
    fn block_list_wins_over_allow_list() {
        let p = CopyPolicy {
            allowed_symbols: vec!["XAUUSD".to_string(), "EURUSD".to_string()],
            blocked_symbols: vec!["XAUUSD".to_string()],
            ..policy()
        };
        assert!(!p.should_copy(TradeDirection::Buy, "XAUUSD"));
        assert!(p.should_copy(TradeDirection::Buy, "EURUSD"));
        // Absent from the allow-list
        assert!(!p.should_copy(TradeDirection::Buy, "GBPUSD"));
    }

    #[test]
    fn effective_direction_respects_opposite_flag() {
        let plain = policy();
        let opposite = CopyPolicy {
            opposite_trades: true,
            ..policy()
        };

        assert_eq!(plain.effective_direction(TradeDirection::Buy), TradeDirection::Buy);
        assert_eq!(
            opposite.effective_direction(TradeDirection::Buy),
            TradeDirection::Sell
        );
        assert_eq!(
            opposite.effective_direction(TradeDirection::SellStop),
            TradeDirection::BuyStop
        );
    }

    #[test]
    fn tag_format() {
        assert_eq!(build_tag(123456, false), "[TKT=123456]");
        assert_eq!(build_tag(123456, true), "[TKT=123456][OPPOSITE]");
    }

    #[test]
    fn malformed_numeric_marks_policy_invalid() {
        let mut settings = HashMap::new();
        settings.insert("fixed_lot".to_string(), "abc".to_string());

        let p = CopyPolicy::from_settings(&settings, Vec::new());
        assert!(p.invalid.is_some());
        // The defective field keeps its default
        assert_eq!(p.fixed_lot, dec!(0.01));
    }

    #[test]
    fn settings_parse_round_trip() {
        let mut settings = HashMap::new();
        settings.insert("lot_mode".to_string(), "ratio".to_string());
        settings.insert("lot_multiplier".to_string(), "2.5".to_string());
        settings.insert("copy_sell".to_string(), "false".to_string());
        settings.insert("allowed_symbols".to_string(), "EURUSD, GBPUSD".to_string());
        settings.insert("magic_number".to_string(), "777".to_string());
        settings.insert("copy_interval".to_string(), "1000".to_string());

        let p = CopyPolicy::from_settings(&settings, Vec::new());
        assert!(p.invalid.is_none());
        assert_eq!(p.mode, SizingMode::Ratio);
        assert_eq!(p.multiplier, dec!(2.5));
        assert!(!p.copy_sell);
        assert_eq!(p.allowed_symbols, vec!["EURUSD", "GBPUSD"]);
        assert_eq!(p.magic_number, 777);
        assert_eq!(p.copy_interval_ms, 1000);
    }
}
