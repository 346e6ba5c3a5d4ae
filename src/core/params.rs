use std::collections::BTreeMap;

use serde_json::{Map, Value as Json};

use super::errors::{CalcError, Result};

pub const START_YEAR: u16 = 2013;
pub const END_YEAR_LONG: u16 = 2027;
pub const END_YEAR_SHORT: u16 = 2020;
pub const NUM_YEARS: usize = (END_YEAR_LONG - START_YEAR + 1) as usize;

pub fn year_index(year: u16) -> Result<usize> {
    if !(START_YEAR..=END_YEAR_LONG).contains(&year) {
        return Err(CalcError::bad_input(format!(
            "year {year} outside supported window [{START_YEAR}, {END_YEAR_LONG}]"
        )));
    }
    Ok((year - START_YEAR) as usize)
}

/// Year-over-year rate series used to extrapolate indexed parameters.
/// `price[i]` / `wage[i]` is the rate applied moving from year
/// `START_YEAR + i` to `START_YEAR + i + 1`, so both have `NUM_YEARS - 1`
/// entries. Each store carries its own copy; nothing here is process-wide.
#[derive(Clone, Debug)]
pub struct IndexingRates {
    pub price: Vec<f64>,
    pub wage: Vec<f64>,
}

impl IndexingRates {
    pub fn zero() -> Self {
        Self {
            price: vec![0.0; NUM_YEARS - 1],
            wage: vec![0.0; NUM_YEARS - 1],
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ValueType {
    Real,
    Integer,
    Boolean,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ValidationLevel {
    Error,
    Warn,
}

/// A range bound is either a literal or the name of another parameter,
/// compared slot-by-slot at the same year.
#[derive(Clone, Debug)]
pub enum RangeBound {
    Value(f64),
    Param(String),
}

#[derive(Clone, Debug)]
pub struct RangeCheck {
    pub min: Option<RangeBound>,
    pub max: Option<RangeBound>,
    pub level: ValidationLevel,
}

#[derive(Clone, Debug)]
pub struct ParamMeta {
    pub title: String,
    pub description: String,
    pub notes: Option<String>,
    pub value_type: ValueType,
    pub indexed: bool,
    pub vi_name: Option<String>,
    pub vi_vals: Vec<String>,
    pub range: Option<RangeCheck>,
    pub section_1: String,
    pub section_2: String,
}

impl ParamMeta {
    pub fn num_slots(&self) -> usize {
        self.vi_vals.len().max(1)
    }
}

#[derive(Clone, Debug)]
pub struct Parameter {
    pub meta: ParamMeta,
    /// Explicit values per slot: baseline observations plus reform overrides.
    known: Vec<BTreeMap<u16, f64>>,
    /// Reform-driven indexing flips, ordered by year; the flag holds from
    /// that year onward.
    index_switches: Vec<(u16, bool)>,
    /// Resolved series, `resolved[year_index][slot]`.
    resolved: Vec<Vec<f64>>,
}

impl Parameter {
    fn indexed_from(&self, year: u16) -> bool {
        let mut flag = self.meta.indexed;
        for &(y, b) in &self.index_switches {
            if y <= year {
                flag = b;
            }
        }
        flag
    }

    /// Recompute the full series from the explicit values, carrying forward
    /// when unindexed and compounding `rates` when indexed. The rate for the
    /// step into year y+1 is read at the from-year y.
    fn resolve(&mut self, name: &str, rates: &[f64]) -> Result<()> {
        let slots = self.meta.num_slots();
        let mut resolved = vec![vec![0.0; slots]; NUM_YEARS];
        for slot in 0..slots {
            let known = &self.known[slot];
            if !known.keys().any(|&y| y <= START_YEAR) {
                return Err(CalcError::bad_input(format!(
                    "parameter {name} has no value at or before {START_YEAR}"
                )));
            }
            for idx in 0..NUM_YEARS {
                let year = START_YEAR + idx as u16;
                resolved[idx][slot] = match known.get(&year) {
                    Some(&v) => v,
                    None if idx == 0 => {
                        // Latest explicit value at or before the window start.
                        *known
                            .range(..=START_YEAR)
                            .next_back()
                            .map(|(_, v)| v)
                            .expect("checked above")
                    }
                    None => {
                        let prev = resolved[idx - 1][slot];
                        if self.indexed_from(year - 1) {
                            prev * (1.0 + rates[idx - 1])
                        } else {
                            prev
                        }
                    }
                };
            }
        }
        self.resolved = resolved;
        Ok(())
    }

    pub fn value_at(&self, year: u16, slot: usize) -> Result<f64> {
        let idx = year_index(year)?;
        self.resolved
            .get(idx)
            .and_then(|v| v.get(slot))
            .copied()
            .ok_or_else(|| CalcError::bad_input(format!("slot {slot} out of range")))
    }
}

/// One value inside a reform entry: a scalar applied to every slot, a full
/// vector, or an indexing flip for `<name>-indexed` keys.
#[derive(Clone, Debug)]
enum OverrideValue {
    Scalar(f64),
    Vector(Vec<f64>),
    IndexFlag(bool),
}

/// Baseline law (or an assumption set) as a mapping from parameter name to
/// metadata plus a resolved time series over the supported window.
#[derive(Clone, Debug)]
pub struct ParameterStore {
    params: BTreeMap<String, Parameter>,
    base_rates: IndexingRates,
    wage_indexed: Vec<String>,
    current_year: u16,
    warnings: Vec<String>,
}

impl ParameterStore {
    /// Parse and resolve a parameter document. The top-level `schema` key is
    /// skipped. Fails on missing metadata, malformed values, or any
    /// `level = "error"` validator violation; `warn` violations accumulate.
    pub fn load(document: &str, rates: IndexingRates, wage_indexed: &[&str]) -> Result<Self> {
        let root: Json = serde_json::from_str(document)
            .map_err(|e| CalcError::bad_input(format!("malformed parameter JSON: {e}")))?;
        let Json::Object(map) = root else {
            return Err(CalcError::bad_input(
                "parameter document top level must be an object",
            ));
        };

        let mut params = BTreeMap::new();
        for (name, node) in &map {
            if name == "schema" {
                continue;
            }
            let obj = node.as_object().ok_or_else(|| {
                CalcError::bad_input(format!("parameter {name} must be an object"))
            })?;
            params.insert(name.clone(), parse_parameter(name, obj)?);
        }

        let mut store = Self {
            params,
            base_rates: rates,
            wage_indexed: wage_indexed.iter().map(|s| s.to_string()).collect(),
            current_year: START_YEAR,
            warnings: Vec::new(),
        };
        store.resolve_all()?;
        let violations = store.collect_range_violations()?;
        if !violations.is_empty() {
            let (param, msg) = violations[0].clone();
            return Err(CalcError::RangeViolation { param, msg });
        }
        Ok(store)
    }

    /// Effective price-indexing rates: the base CPI series plus the resolved
    /// `CPI_offset` value at each step's from-year.
    pub fn price_indexing_rates(&self) -> Vec<f64> {
        let mut rates = self.base_rates.price.clone();
        if let Some(offset) = self.params.get("CPI_offset") {
            for (i, r) in rates.iter_mut().enumerate() {
                if let Some(row) = offset.resolved.get(i) {
                    *r += row[0];
                }
            }
        }
        rates
    }

    pub fn wage_indexing_rates(&self) -> &[f64] {
        &self.base_rates.wage
    }

    /// Per-year multiplicative rates used to extrapolate the named
    /// parameter: the wage series for wage-indexed parameters, the effective
    /// price series otherwise.
    pub fn parameter_indexing_rates(&self, name: &str) -> Result<Vec<f64>> {
        if !self.params.contains_key(name) {
            return Err(CalcError::bad_input(format!("unknown parameter {name}")));
        }
        if self.wage_indexed.iter().any(|w| w == name) {
            Ok(self.base_rates.wage.clone())
        } else {
            Ok(self.price_indexing_rates())
        }
    }

    fn resolve_all(&mut self) -> Result<()> {
        // CPI_offset resolves first (it is never itself indexed) because the
        // effective price series depends on it.
        if let Some(mut offset) = self.params.remove("CPI_offset") {
            offset.resolve("CPI_offset", &vec![0.0; NUM_YEARS - 1])?;
            self.params.insert("CPI_offset".to_string(), offset);
        }
        let price = self.price_indexing_rates();
        let names: Vec<String> = self.params.keys().cloned().collect();
        for name in names {
            if name == "CPI_offset" {
                continue;
            }
            let rates = if self.wage_indexed.iter().any(|w| *w == name) {
                self.base_rates.wage.clone()
            } else {
                price.clone()
            };
            let mut param = self.params.remove(&name).expect("key just listed");
            param.resolve(&name, &rates)?;
            self.params.insert(name, param);
        }
        Ok(())
    }

    fn resolve_bound(&self, bound: &RangeBound, year_idx: usize, slot: usize) -> Option<f64> {
        match bound {
            RangeBound::Value(v) => Some(*v),
            RangeBound::Param(other) => {
                let p = self.params.get(other)?;
                let s = if p.meta.num_slots() == 1 { 0 } else { slot };
                p.resolved.get(year_idx).and_then(|row| row.get(s)).copied()
            }
        }
    }

    /// Walk every (parameter, year, slot) against its validators. Warn-level
    /// violations are appended to the store's warning log; error-level ones
    /// are returned.
    fn collect_range_violations(&mut self) -> Result<Vec<(String, String)>> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for (name, param) in &self.params {
            let Some(range) = &param.meta.range else {
                continue;
            };
            for idx in 0..NUM_YEARS {
                let year = START_YEAR + idx as u16;
                for slot in 0..param.meta.num_slots() {
                    let value = param.resolved[idx][slot];
                    let mut fail = None;
                    if let Some(min) = &range.min {
                        if let Some(lo) = self.resolve_bound(min, idx, slot) {
                            if value < lo {
                                fail = Some(format!(
                                    "value {value} < min {lo} for year {year}"
                                ));
                            }
                        }
                    }
                    if fail.is_none() {
                        if let Some(max) = &range.max {
                            if let Some(hi) = self.resolve_bound(max, idx, slot) {
                                if value > hi {
                                    fail = Some(format!(
                                        "value {value} > max {hi} for year {year}"
                                    ));
                                }
                            }
                        }
                    }
                    if let Some(msg) = fail {
                        match range.level {
                            ValidationLevel::Error => errors.push((name.clone(), msg)),
                            ValidationLevel::Warn => {
                                warnings.push(format!("WARNING: {name} {msg}"));
                            }
                        }
                    }
                }
            }
        }
        self.warnings.extend(warnings);
        Ok(errors)
    }

    /// Apply ordered `{year: {name: value}}` overrides under a transactional
    /// buffer: the live store is replaced only after the staged store
    /// re-resolves and validates in full.
    pub fn apply_overrides(&mut self, reform: &Json) -> Result<()> {
        let Json::Object(by_year) = reform else {
            return Err(CalcError::bad_input(
                "reform must be an object keyed by year",
            ));
        };

        let mut entries: Vec<(u16, &Map<String, Json>)> = Vec::new();
        for (key, node) in by_year {
            let year: u16 = key.parse().map_err(|_| {
                CalcError::bad_input(format!("reform year {key} is not an integer"))
            })?;
            year_index(year)?;
            if year < self.current_year {
                return Err(CalcError::bad_input(format!(
                    "reform year {year} precedes current year {}",
                    self.current_year
                )));
            }
            let obj = node.as_object().ok_or_else(|| {
                CalcError::bad_input(format!("reform entry for {year} must be an object"))
            })?;
            entries.push((year, obj));
        }
        entries.sort_by_key(|(y, _)| *y);

        let mut staged = self.clone();
        for (year, obj) in entries {
            for (raw_name, value) in obj {
                let (name, ov) = parse_override(raw_name, value)?;
                let param = staged.params.get_mut(&name).ok_or_else(|| {
                    CalcError::bad_input(format!("unknown parameter {name}"))
                })?;
                match ov {
                    OverrideValue::IndexFlag(flag) => {
                        param.index_switches.push((year, flag));
                        param.index_switches.sort_by_key(|(y, _)| *y);
                    }
                    OverrideValue::Scalar(v) => {
                        for slot in 0..param.meta.num_slots() {
                            param.known[slot].insert(year, v);
                        }
                    }
                    OverrideValue::Vector(vs) => {
                        if vs.len() != param.meta.num_slots() {
                            return Err(CalcError::bad_input(format!(
                                "parameter {name} expects {} values, got {}",
                                param.meta.num_slots(),
                                vs.len()
                            )));
                        }
                        for (slot, v) in vs.iter().enumerate() {
                            param.known[slot].insert(year, *v);
                        }
                    }
                }
            }
        }

        staged.resolve_all()?;
        let violations = staged.collect_range_violations()?;
        if let Some((param, msg)) = violations.into_iter().next() {
            return Err(CalcError::RangeViolation { param, msg });
        }
        *self = staged;
        Ok(())
    }

    pub fn set_year(&mut self, year: u16) -> Result<()> {
        year_index(year)?;
        self.current_year = year;
        Ok(())
    }

    pub fn current_year(&self) -> u16 {
        self.current_year
    }

    /// Scalar parameter value at the bound year.
    pub fn get(&self, name: &str) -> Result<f64> {
        let param = self
            .params
            .get(name)
            .ok_or_else(|| CalcError::bad_input(format!("unknown parameter {name}")))?;
        if param.meta.num_slots() != 1 {
            return Err(CalcError::bad_input(format!(
                "parameter {name} is vector-valued; use get_vector"
            )));
        }
        param.value_at(self.current_year, 0)
    }

    /// Vector parameter values (one per `vi_vals` label) at the bound year.
    pub fn get_vector(&self, name: &str) -> Result<&[f64]> {
        let param = self
            .params
            .get(name)
            .ok_or_else(|| CalcError::bad_input(format!("unknown parameter {name}")))?;
        let idx = year_index(self.current_year)?;
        Ok(&param.resolved[idx])
    }

    pub fn value_at(&self, name: &str, year: u16, slot: usize) -> Result<f64> {
        self.params
            .get(name)
            .ok_or_else(|| CalcError::bad_input(format!("unknown parameter {name}")))?
            .value_at(year, slot)
    }

    pub fn meta(&self, name: &str) -> Option<&ParamMeta> {
        self.params.get(name).map(|p| &p.meta)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(|s| s.as_str())
    }

    pub fn reform_warnings(&self) -> &[String] {
        &self.warnings
    }
}

fn parse_override(raw_name: &str, value: &Json) -> Result<(String, OverrideValue)> {
    if let Some(base) = raw_name.strip_suffix("-indexed") {
        let flag = value.as_bool().ok_or_else(|| {
            CalcError::bad_input(format!("{raw_name} expects a boolean value"))
        })?;
        return Ok((base.to_string(), OverrideValue::IndexFlag(flag)));
    }
    let ov = match value {
        Json::Bool(b) => OverrideValue::Scalar(if *b { 1.0 } else { 0.0 }),
        Json::Number(n) => OverrideValue::Scalar(n.as_f64().ok_or_else(|| {
            CalcError::bad_input(format!("{raw_name} value is not representable"))
        })?),
        Json::Array(items) => {
            let mut vs = Vec::with_capacity(items.len());
            for item in items {
                vs.push(item.as_f64().ok_or_else(|| {
                    CalcError::bad_input(format!("{raw_name} vector entries must be numeric"))
                })?);
            }
            OverrideValue::Vector(vs)
        }
        _ => {
            return Err(CalcError::bad_input(format!(
                "{raw_name} value must be a number, boolean, or array"
            )));
        }
    };
    Ok((raw_name.to_string(), ov))
}

fn parse_parameter(name: &str, obj: &Map<String, Json>) -> Result<Parameter> {
    let title = required_str(name, obj, "title")?;
    let description = required_str(name, obj, "description")?;
    let notes = obj
        .get("notes")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let value_type = match required_str(name, obj, "type")?.as_str() {
        "real" => ValueType::Real,
        "integer" => ValueType::Integer,
        "boolean" => ValueType::Boolean,
        other => {
            return Err(CalcError::bad_input(format!(
                "parameter {name} has unknown type {other}"
            )));
        }
    };

    let indexed = obj
        .get("indexed")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let vi_name = obj
        .get("vi_name")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let vi_vals: Vec<String> = match obj.get("vi_vals") {
        Some(Json::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str().map(|s| s.to_string()).ok_or_else(|| {
                    CalcError::bad_input(format!("parameter {name} vi_vals must be strings"))
                })
            })
            .collect::<Result<_>>()?,
        Some(_) => {
            return Err(CalcError::bad_input(format!(
                "parameter {name} vi_vals must be an array"
            )));
        }
        None => Vec::new(),
    };
    if vi_name.is_some() != !vi_vals.is_empty() {
        return Err(CalcError::bad_input(format!(
            "parameter {name} must carry vi_name and vi_vals together"
        )));
    }

    let range = match obj.get("validators").and_then(|v| v.get("range")) {
        Some(r) => Some(parse_range(name, r)?),
        None => None,
    };

    let section_1 = optional_str(obj, "section_1");
    let section_2 = optional_str(obj, "section_2");

    let meta = ParamMeta {
        title,
        description,
        notes,
        value_type,
        indexed,
        vi_name: vi_name.clone(),
        vi_vals,
        range,
        section_1,
        section_2,
    };

    let slots = meta.num_slots();
    let mut known: Vec<BTreeMap<u16, f64>> = vec![BTreeMap::new(); slots];

    let values = obj
        .get("value")
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            CalcError::bad_input(format!("parameter {name} is missing its value list"))
        })?;
    for entry in values {
        let Some(entry) = entry.as_object() else {
            return Err(CalcError::bad_input(format!(
                "parameter {name} value entries must be objects"
            )));
        };
        let year = entry
            .get("year")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| {
                CalcError::bad_input(format!("parameter {name} value entry missing year"))
            })? as u16;
        let value = parse_value(name, &meta, entry.get("value"))?;
        let slot = match (&vi_name, entry.get(vi_name.as_deref().unwrap_or(""))) {
            (Some(vi), Some(label_node)) => {
                let label = label_node.as_str().ok_or_else(|| {
                    CalcError::bad_input(format!("parameter {name} {vi} label must be a string"))
                })?;
                Some(meta.vi_vals.iter().position(|v| v == label).ok_or_else(|| {
                    CalcError::bad_input(format!(
                        "parameter {name} has unknown {vi} label {label}"
                    ))
                })?)
            }
            _ => None,
        };
        match slot {
            // Ordered list, last value wins per (year, label).
            Some(s) => {
                known[s].insert(year, value);
            }
            None => {
                for k in &mut known {
                    k.insert(year, value);
                }
            }
        }
    }

    Ok(Parameter {
        meta,
        known,
        index_switches: Vec::new(),
        resolved: Vec::new(),
    })
}

fn parse_value(name: &str, meta: &ParamMeta, node: Option<&Json>) -> Result<f64> {
    let node = node.ok_or_else(|| {
        CalcError::bad_input(format!("parameter {name} value entry missing value"))
    })?;
    match (meta.value_type, node) {
        (ValueType::Boolean, Json::Bool(b)) => Ok(if *b { 1.0 } else { 0.0 }),
        (ValueType::Boolean, _) => Err(CalcError::bad_input(format!(
            "parameter {name} expects boolean values"
        ))),
        (ValueType::Integer, Json::Number(n)) => {
            let v = n.as_f64().unwrap_or(f64::NAN);
            if v.fract() != 0.0 {
                return Err(CalcError::bad_input(format!(
                    "parameter {name} expects integer values, got {v}"
                )));
            }
            Ok(v)
        }
        (ValueType::Real, Json::Number(n)) => n.as_f64().ok_or_else(|| {
            CalcError::bad_input(format!("parameter {name} value is not representable"))
        }),
        _ => Err(CalcError::bad_input(format!(
            "parameter {name} expects numeric values"
        ))),
    }
}

fn parse_range(name: &str, node: &Json) -> Result<RangeCheck> {
    let obj = node.as_object().ok_or_else(|| {
        CalcError::bad_input(format!("parameter {name} range validator must be an object"))
    })?;
    let level = match obj.get("level").and_then(|v| v.as_str()).unwrap_or("error") {
        "error" => ValidationLevel::Error,
        "warn" => ValidationLevel::Warn,
        other => {
            return Err(CalcError::bad_input(format!(
                "parameter {name} has unknown validator level {other}"
            )));
        }
    };
    let parse_bound = |key: &str| -> Result<Option<RangeBound>> {
        match obj.get(key) {
            None => Ok(None),
            Some(Json::Number(n)) => Ok(Some(RangeBound::Value(n.as_f64().ok_or_else(
                || CalcError::bad_input(format!("parameter {name} {key} is not representable")),
            )?))),
            Some(Json::String(s)) => Ok(Some(RangeBound::Param(s.clone()))),
            Some(_) => Err(CalcError::bad_input(format!(
                "parameter {name} {key} must be a number or parameter name"
            ))),
        }
    };
    Ok(RangeCheck {
        min: parse_bound("min")?,
        max: parse_bound("max")?,
        level,
    })
}

fn required_str(name: &str, obj: &Map<String, Json>, key: &str) -> Result<String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            CalcError::bad_input(format!("parameter {name} is missing required field {key}"))
        })
}

fn optional_str(obj: &Map<String, Json>, key: &str) -> String {
    obj.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}
