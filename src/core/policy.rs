use serde_json::Value as Json;

use super::assumptions::GrowFactors;
use super::errors::{CalcError, Result};
use super::params::{ParameterStore, START_YEAR};

const POLICY_JSON: &str = include_str!("../../data/policy_current_law.json");

/// Parameters extrapolated with average wage growth instead of CPI-U.
const WAGE_INDEXED: [&str; 1] = ["SS_Earnings_c"];

/// Number of filing-status categories (single, mjoint, mseparate, headhh,
/// widow) and EITC child-count categories.
pub const NUM_MARS: usize = 5;
pub const NUM_EIC: usize = 4;

/// The tax-law parameter store: current-law baseline plus any implemented
/// reforms, bound to one year at a time.
#[derive(Clone, Debug)]
pub struct Policy {
    store: ParameterStore,
}

impl Policy {
    /// Current-law policy using the default grow-factor tables.
    pub fn current_law() -> Result<Self> {
        Self::with_growfactors(&GrowFactors::default())
    }

    /// Current-law policy whose indexing rates derive from the supplied
    /// grow factors (already composed with any growdiff).
    pub fn with_growfactors(growfactors: &GrowFactors) -> Result<Self> {
        Ok(Self {
            store: ParameterStore::load(POLICY_JSON, growfactors.indexing_rates(), &WAGE_INDEXED)?,
        })
    }

    /// Load a policy baseline from an arbitrary document. Used by tests and
    /// by callers substituting a converted legacy document; a document that
    /// fails schema validation is rejected here rather than trusted.
    pub fn from_document(document: &str, growfactors: &GrowFactors) -> Result<Self> {
        Ok(Self {
            store: ParameterStore::load(document, growfactors.indexing_rates(), &WAGE_INDEXED)?,
        })
    }

    /// Apply a `{year: {name: value}}` reform. Validation is transactional:
    /// on any failure the policy is left exactly as it was.
    pub fn implement_reform(&mut self, reform: &Json) -> Result<()> {
        self.store.apply_overrides(reform)
    }

    pub fn set_year(&mut self, year: u16) -> Result<()> {
        self.store.set_year(year)
    }

    pub fn current_year(&self) -> u16 {
        self.store.current_year()
    }

    pub fn start_year(&self) -> u16 {
        START_YEAR
    }

    pub fn reform_warnings(&self) -> &[String] {
        self.store.reform_warnings()
    }

    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    pub fn parameter_indexing_rates(&self, name: &str) -> Result<Vec<f64>> {
        self.store.parameter_indexing_rates(name)
    }

    fn mars_vector(&self, name: &str) -> Result<[f64; NUM_MARS]> {
        let v = self.store.get_vector(name)?;
        if v.len() != NUM_MARS {
            return Err(CalcError::bad_input(format!(
                "parameter {name} expects {NUM_MARS} filing-status values"
            )));
        }
        Ok([v[0], v[1], v[2], v[3], v[4]])
    }

    fn eic_vector(&self, name: &str) -> Result<[f64; NUM_EIC]> {
        let v = self.store.get_vector(name)?;
        if v.len() != NUM_EIC {
            return Err(CalcError::bad_input(format!(
                "parameter {name} expects {NUM_EIC} child-count values"
            )));
        }
        Ok([v[0], v[1], v[2], v[3]])
    }

    /// Snapshot of every scalar the tax functions consume, resolved at the
    /// bound year. Functions receive this struct, never the store.
    pub fn tax_params(&self) -> Result<TaxParams> {
        let s = &self.store;
        Ok(TaxParams {
            ii_rt: [
                s.get("II_rt1")?,
                s.get("II_rt2")?,
                s.get("II_rt3")?,
                s.get("II_rt4")?,
                s.get("II_rt5")?,
                s.get("II_rt6")?,
                s.get("II_rt7")?,
            ],
            ii_brk: [
                self.mars_vector("II_brk1")?,
                self.mars_vector("II_brk2")?,
                self.mars_vector("II_brk3")?,
                self.mars_vector("II_brk4")?,
                self.mars_vector("II_brk5")?,
                self.mars_vector("II_brk6")?,
            ],
            std: self.mars_vector("STD")?,
            std_aged: self.mars_vector("STD_Aged")?,
            ii_em: s.get("II_em")?,
            ii_em_ps: self.mars_vector("II_em_ps")?,
            ii_prt: s.get("II_prt")?,
            id_medical_frt: s.get("ID_Medical_frt")?,
            id_charity_crt_all: s.get("ID_Charity_crt_all")?,
            id_miscellaneous_frt: s.get("ID_Miscellaneous_frt")?,
            id_ps: self.mars_vector("ID_ps")?,
            id_prt: s.get("ID_prt")?,
            id_crt: s.get("ID_crt")?,
            cg_rt1: s.get("CG_rt1")?,
            cg_rt2: s.get("CG_rt2")?,
            cg_rt3: s.get("CG_rt3")?,
            cg_brk1: self.mars_vector("CG_brk1")?,
            cg_brk2: self.mars_vector("CG_brk2")?,
            amt_em: self.mars_vector("AMT_em")?,
            amt_em_ps: self.mars_vector("AMT_em_ps")?,
            amt_prt: s.get("AMT_prt")?,
            amt_rt1: s.get("AMT_rt1")?,
            amt_rt2: s.get("AMT_rt2")?,
            amt_brk1: s.get("AMT_brk1")?,
            ctc_c: s.get("CTC_c")?,
            ctc_ps: self.mars_vector("CTC_ps")?,
            ctc_prt: s.get("CTC_prt")?,
            eitc_c: self.eic_vector("EITC_c")?,
            eitc_rt: self.eic_vector("EITC_rt")?,
            eitc_ps: self.eic_vector("EITC_ps")?,
            eitc_prt: self.eic_vector("EITC_prt")?,
            eitc_ps_married: self.eic_vector("EITC_ps_MarriedJ")?,
            eitc_invest_c: s.get("EITC_InvestIncome_c")?,
            fica_ss_trt: s.get("FICA_ss_trt")?,
            ss_earnings_c: s.get("SS_Earnings_c")?,
            fica_mc_trt: s.get("FICA_mc_trt")?,
            amedt_rt: s.get("AMEDT_rt")?,
            amedt_ec: self.mars_vector("AMEDT_ec")?,
            ss_thd50: self.mars_vector("SS_thd50")?,
            ss_thd85: self.mars_vector("SS_thd85")?,
        })
    }
}

/// Tax-law scalars at one year. Bracket arrays are `[bracket][filing
/// status]`; EITC arrays are indexed by qualifying-child count.
#[derive(Clone, Debug)]
pub struct TaxParams {
    pub ii_rt: [f64; 7],
    pub ii_brk: [[f64; NUM_MARS]; 6],
    pub std: [f64; NUM_MARS],
    pub std_aged: [f64; NUM_MARS],
    pub ii_em: f64,
    pub ii_em_ps: [f64; NUM_MARS],
    pub ii_prt: f64,
    pub id_medical_frt: f64,
    pub id_charity_crt_all: f64,
    pub id_miscellaneous_frt: f64,
    pub id_ps: [f64; NUM_MARS],
    pub id_prt: f64,
    pub id_crt: f64,
    pub cg_rt1: f64,
    pub cg_rt2: f64,
    pub cg_rt3: f64,
    pub cg_brk1: [f64; NUM_MARS],
    pub cg_brk2: [f64; NUM_MARS],
    pub amt_em: [f64; NUM_MARS],
    pub amt_em_ps: [f64; NUM_MARS],
    pub amt_prt: f64,
    pub amt_rt1: f64,
    pub amt_rt2: f64,
    pub amt_brk1: f64,
    pub ctc_c: f64,
    pub ctc_ps: [f64; NUM_MARS],
    pub ctc_prt: f64,
    pub eitc_c: [f64; NUM_EIC],
    pub eitc_rt: [f64; NUM_EIC],
    pub eitc_ps: [f64; NUM_EIC],
    pub eitc_prt: [f64; NUM_EIC],
    pub eitc_ps_married: [f64; NUM_EIC],
    pub eitc_invest_c: f64,
    pub fica_ss_trt: f64,
    pub ss_earnings_c: f64,
    pub fica_mc_trt: f64,
    pub amedt_rt: f64,
    pub amedt_ec: [f64; NUM_MARS],
    pub ss_thd50: [f64; NUM_MARS],
    pub ss_thd85: [f64; NUM_MARS],
}
