//! Per-country default discovery radius.
//!
//! The table is compiled in and built once at startup via
//! [`CountryPolicyTable::builtin`]; callers share it by reference.
//! Codes without an entry fall through to the reserved default
//! (25 km, "Global").

use serde::Serialize;
use std::collections::BTreeMap;

/// Reserved key for the fallback policy.
pub const DEFAULT_POLICY_CODE: &str = "DEFAULT";
pub const DEFAULT_RADIUS_KM: u32 = 25;
pub const DEFAULT_LABEL: &str = "Global";
const DEFAULT_GLYPH: &str = "\u{1F310}";

/// Default discovery radius and display metadata for one country.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountryPolicy {
    pub country_code: String,
    pub default_radius_km: u32,
    pub display_label: String,
    pub flag_glyph: String,
}

impl CountryPolicy {
    pub fn is_default(&self) -> bool {
        self.country_code == DEFAULT_POLICY_CODE
    }
}

// ─── Built-in table ─────────────────────────────────────────────

struct PolicyEntry {
    code: &'static str,
    radius_km: u32,
    label: &'static str,
}

const fn entry(code: &'static str, radius_km: u32, label: &'static str) -> PolicyEntry {
    PolicyEntry { code, radius_km, label }
}

const BUILTIN_POLICIES: &[PolicyEntry] = &[
    // GCC and small states
    entry("BH", 10, "Bahrain"),
    entry("QA", 15, "Qatar"),
    entry("KW", 15, "Kuwait"),
    entry("AE", 25, "United Arab Emirates"),
    entry("OM", 40, "Oman"),
    entry("LB", 15, "Lebanon"),
    entry("SG", 10, "Singapore"),
    entry("JO", 30, "Jordan"),
    // Medium
    entry("EG", 50, "Egypt"),
    entry("MA", 50, "Morocco"),
    entry("TN", 40, "Tunisia"),
    entry("IQ", 50, "Iraq"),
    entry("TR", 50, "Turkey"),
    entry("PK", 50, "Pakistan"),
    entry("MY", 40, "Malaysia"),
    entry("ID", 50, "Indonesia"),
    // Large
    entry("SA", 75, "Saudi Arabia"),
    entry("DZ", 75, "Algeria"),
    entry("IN", 75, "India"),
    entry("RU", 100, "Russia"),
    entry("CN", 100, "China"),
    entry("AU", 100, "Australia"),
    // Europe
    entry("GB", 40, "United Kingdom"),
    entry("FR", 50, "France"),
    entry("DE", 50, "Germany"),
    entry("ES", 50, "Spain"),
    entry("IT", 50, "Italy"),
    entry("NL", 25, "Netherlands"),
    entry("BE", 25, "Belgium"),
    entry("CH", 30, "Switzerland"),
    entry("AT", 40, "Austria"),
    entry("SE", 60, "Sweden"),
    entry("NO", 60, "Norway"),
    entry("PL", 50, "Poland"),
    // Americas
    entry("US", 80, "United States"),
    entry("CA", 100, "Canada"),
    entry("MX", 75, "Mexico"),
    entry("BR", 100, "Brazil"),
    entry("AR", 100, "Argentina"),
];

/// Regional-indicator flag for an alpha-2 code, e.g. "FR" → 🇫🇷.
pub fn flag_glyph(code: &str) -> String {
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return DEFAULT_GLYPH.to_string();
    }
    code.to_ascii_uppercase()
        .chars()
        .filter_map(|c| char::from_u32(0x1F1E6 + (c as u32 - 'A' as u32)))
        .collect()
}

/// Immutable country → policy mapping.
#[derive(Debug, Clone)]
pub struct CountryPolicyTable {
    entries: BTreeMap<String, CountryPolicy>,
    default: CountryPolicy,
}

impl CountryPolicyTable {
    /// Build the compiled-in table.
    pub fn builtin() -> Self {
        let entries = BUILTIN_POLICIES
            .iter()
            .map(|e| {
                let policy = CountryPolicy {
                    country_code: e.code.to_string(),
                    default_radius_km: e.radius_km,
                    display_label: e.label.to_string(),
                    flag_glyph: flag_glyph(e.code),
                };
                (e.code.to_string(), policy)
            })
            .collect();

        Self {
            entries,
            default: CountryPolicy {
                country_code: DEFAULT_POLICY_CODE.to_string(),
                default_radius_km: DEFAULT_RADIUS_KM,
                display_label: DEFAULT_LABEL.to_string(),
                flag_glyph: DEFAULT_GLYPH.to_string(),
            },
        }
    }

    /// Case-insensitive lookup; missing, empty and unknown codes get the default policy.
    pub fn lookup(&self, country_code: Option<&str>) -> &CountryPolicy {
        let code = match country_code.map(str::trim) {
            Some(c) if !c.is_empty() => c.to_ascii_uppercase(),
            _ => return &self.default,
        };
        self.entries.get(&code).unwrap_or(&self.default)
    }

    pub fn default_policy(&self) -> &CountryPolicy {
        &self.default
    }

    /// Curated entries ordered by country code.
    pub fn entries(&self) -> impl Iterator<Item = &CountryPolicy> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CountryPolicyTable {
    fn default() -> Self {
        Self::builtin()
    }
}
