use crate::utils::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 內建的預設資料集，診所 id 為 key
const BUILTIN_TABLES: &str = include_str!("default_tables.toml");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClinicDefaults {
    #[serde(default)]
    pub ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupEntry {
    pub name: String,
    #[serde(default)]
    pub price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TablesFile {
    #[serde(default)]
    treatment_defaults: HashMap<String, ClinicDefaults>,
    #[serde(default)]
    treatment_lookup: HashMap<String, HashMap<String, LookupEntry>>,
}

/// 每間診所的預設治療 id 與 id -> (名稱, 價格) 查找表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreatmentTables {
    defaults: HashMap<String, Vec<u64>>,
    lookup: HashMap<String, HashMap<u64, LookupEntry>>,
}

impl TreatmentTables {
    pub fn builtin() -> Result<Self> {
        let file: TablesFile =
            toml::from_str(BUILTIN_TABLES).map_err(|e| EngineError::ConfigValidation {
                field: "default_tables".to_string(),
                message: e.to_string(),
            })?;
        Self::from_sections(&file.treatment_defaults, &file.treatment_lookup)
    }

    pub fn from_sections(
        defaults: &HashMap<String, ClinicDefaults>,
        lookup: &HashMap<String, HashMap<String, LookupEntry>>,
    ) -> Result<Self> {
        let defaults = defaults
            .iter()
            .map(|(clinic, d)| (clinic.clone(), d.ids.clone()))
            .collect();

        let mut parsed = HashMap::new();
        for (clinic, entries) in lookup {
            let mut by_id = HashMap::new();
            for (key, entry) in entries {
                let id = key.trim().parse::<u64>().map_err(|_| EngineError::InvalidConfigValue {
                    field: format!("treatment_lookup.{}", clinic),
                    value: key.clone(),
                    reason: "Treatment id must be numeric".to_string(),
                })?;
                by_id.insert(id, entry.clone());
            }
            parsed.insert(clinic.clone(), by_id);
        }

        Ok(Self {
            defaults,
            lookup: parsed,
        })
    }

    /// 以 `self` 的診所設定覆蓋 `base`，整間診所為單位替換
    pub fn merged_over(self, base: TreatmentTables) -> Self {
        let mut defaults = base.defaults;
        defaults.extend(self.defaults);
        let mut lookup = base.lookup;
        lookup.extend(self.lookup);
        Self { defaults, lookup }
    }

    pub fn with_defaults(mut self, clinic_id: &str, ids: Vec<u64>) -> Self {
        self.defaults.insert(clinic_id.to_string(), ids);
        self
    }

    pub fn with_lookup(mut self, clinic_id: &str, treatment_id: u64, name: &str, price: Option<f64>) -> Self {
        self.lookup.entry(clinic_id.to_string()).or_default().insert(
            treatment_id,
            LookupEntry {
                name: name.to_string(),
                price,
            },
        );
        self
    }

    pub fn default_ids(&self, clinic_id: &str) -> &[u64] {
        self.defaults.get(clinic_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn lookup(&self, clinic_id: &str, treatment_id: u64) -> Option<&LookupEntry> {
        self.lookup.get(clinic_id)?.get(&treatment_id)
    }
}
