use std::collections::BTreeMap;

use super::assumptions::{Consumption, GrowFactors};
use super::errors::{CalcError, Result};
use super::params::{END_YEAR_LONG, year_index};

/// Money input columns and the grow-factor series that ages each of them.
const AGED_COLUMNS: [(&str, &str); 21] = [
    ("e00200", "AWAGE"),
    ("e00300", "AINTS"),
    ("e00400", "AINTS"),
    ("e00600", "ADIVS"),
    ("e00650", "ADIVS"),
    ("e00900", "ASCHCI"),
    ("e01700", "ACPIU"),
    ("e02000", "ASCHEI"),
    ("e02300", "AUCOMP"),
    ("e02400", "ASOCSEC"),
    ("p22250", "ACGNS"),
    ("p23250", "ACGNS"),
    ("e17500", "ACPIU"),
    ("e18400", "ACPIU"),
    ("e18500", "ACPIU"),
    ("e19200", "ACPIU"),
    ("e19800", "ACPIU"),
    ("e20100", "ACPIU"),
    ("e20400", "ACPIU"),
    ("e32800", "ACPIU"),
    ("s006", "APOPN"),
];

/// Expense columns subject to consumption scaling, matching the MPC_*
/// assumption parameters.
const CONSUMPTION_COLUMNS: [&str; 4] = ["e17500", "e18400", "e19800", "e20400"];

const INTEGER_COLUMNS: [&str; 7] = ["RECID", "MARS", "XTOT", "n24", "EIC", "age_head", "FLPDYR"];

pub const OUTPUT_COLUMNS: [&str; 20] = [
    "sey",
    "payrolltax",
    "ptax_was",
    "setax",
    "ptax_amc",
    "c02500",
    "c00100",
    "pre_c04600",
    "c04600",
    "c04470",
    "standard",
    "c04800",
    "taxbc",
    "c62100",
    "c09600",
    "c07220",
    "eitc",
    "iitax",
    "combined",
    "expanded_income",
];

/// Base identifier assigned to the first non-filer during renumbering.
const NONFILER_RECID_BASE: u64 = 4_000_000;

/// Columnar table of filer records: one closed input schema, one closed
/// output schema, and a sampling weight per row. Constructed once and
/// advanced monotonically through years.
#[derive(Clone, Debug)]
pub struct Records {
    current_year: u16,
    // identifiers and demographics
    pub recid: Vec<u64>,
    pub mars: Vec<u8>,
    pub xtot: Vec<u32>,
    pub n24: Vec<u32>,
    pub eic: Vec<u32>,
    pub age_head: Vec<u32>,
    pub flpdyr: Vec<u16>,
    // sampling weight
    pub s006: Vec<f64>,
    // income inputs
    pub e00200: Vec<f64>,
    pub e00300: Vec<f64>,
    pub e00400: Vec<f64>,
    pub e00600: Vec<f64>,
    pub e00650: Vec<f64>,
    pub e00900: Vec<f64>,
    pub e01700: Vec<f64>,
    pub e02000: Vec<f64>,
    pub e02300: Vec<f64>,
    pub e02400: Vec<f64>,
    pub p22250: Vec<f64>,
    pub p23250: Vec<f64>,
    // expense inputs
    pub e17500: Vec<f64>,
    pub e18400: Vec<f64>,
    pub e18500: Vec<f64>,
    pub e19200: Vec<f64>,
    pub e19800: Vec<f64>,
    pub e20100: Vec<f64>,
    pub e20400: Vec<f64>,
    pub e32800: Vec<f64>,
    // outputs
    pub sey: Vec<f64>,
    pub payrolltax: Vec<f64>,
    pub ptax_was: Vec<f64>,
    pub setax: Vec<f64>,
    pub ptax_amc: Vec<f64>,
    pub c02500: Vec<f64>,
    pub c00100: Vec<f64>,
    pub pre_c04600: Vec<f64>,
    pub c04600: Vec<f64>,
    pub c04470: Vec<f64>,
    pub standard: Vec<f64>,
    pub c04800: Vec<f64>,
    pub taxbc: Vec<f64>,
    pub c62100: Vec<f64>,
    pub c09600: Vec<f64>,
    pub c07220: Vec<f64>,
    pub eitc: Vec<f64>,
    pub iitax: Vec<f64>,
    pub combined: Vec<f64>,
    pub expanded_income: Vec<f64>,
}

impl Records {
    fn empty(start_year: u16, dim: usize) -> Result<Self> {
        year_index(start_year)?;
        Ok(Self {
            current_year: start_year,
            recid: vec![0; dim],
            mars: vec![1; dim],
            xtot: vec![1; dim],
            n24: vec![0; dim],
            eic: vec![0; dim],
            age_head: vec![0; dim],
            flpdyr: vec![start_year; dim],
            s006: vec![1.0; dim],
            e00200: vec![0.0; dim],
            e00300: vec![0.0; dim],
            e00400: vec![0.0; dim],
            e00600: vec![0.0; dim],
            e00650: vec![0.0; dim],
            e00900: vec![0.0; dim],
            e01700: vec![0.0; dim],
            e02000: vec![0.0; dim],
            e02300: vec![0.0; dim],
            e02400: vec![0.0; dim],
            p22250: vec![0.0; dim],
            p23250: vec![0.0; dim],
            e17500: vec![0.0; dim],
            e18400: vec![0.0; dim],
            e18500: vec![0.0; dim],
            e19200: vec![0.0; dim],
            e19800: vec![0.0; dim],
            e20100: vec![0.0; dim],
            e20400: vec![0.0; dim],
            e32800: vec![0.0; dim],
            sey: vec![0.0; dim],
            payrolltax: vec![0.0; dim],
            ptax_was: vec![0.0; dim],
            setax: vec![0.0; dim],
            ptax_amc: vec![0.0; dim],
            c02500: vec![0.0; dim],
            c00100: vec![0.0; dim],
            pre_c04600: vec![0.0; dim],
            c04600: vec![0.0; dim],
            c04470: vec![0.0; dim],
            standard: vec![0.0; dim],
            c04800: vec![0.0; dim],
            taxbc: vec![0.0; dim],
            c62100: vec![0.0; dim],
            c09600: vec![0.0; dim],
            c07220: vec![0.0; dim],
            eitc: vec![0.0; dim],
            iitax: vec![0.0; dim],
            combined: vec![0.0; dim],
            expanded_income: vec![0.0; dim],
        })
    }

    /// Parse a filer CSV: a header row of schema column names followed by
    /// one numeric row per filer. `RECID` and `s006` are required; missing
    /// optional columns take their documented defaults (`MARS`=1, `XTOT`=1,
    /// everything else 0).
    pub fn from_csv(text: &str, start_year: u16) -> Result<Self> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| CalcError::bad_input("records CSV is empty"))?;
        let names: Vec<&str> = header.split(',').map(|s| s.trim()).collect();

        for name in &names {
            if !is_input_column(name) {
                return Err(CalcError::bad_input(format!(
                    "unknown records column {name}"
                )));
            }
        }
        for required in ["RECID", "s006"] {
            if !names.contains(&required) {
                return Err(CalcError::bad_input(format!(
                    "records CSV is missing required column {required}"
                )));
            }
        }

        let rows: Vec<Vec<f64>> = lines
            .enumerate()
            .map(|(i, line)| {
                let cells: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
                if cells.len() != names.len() {
                    return Err(CalcError::bad_input(format!(
                        "records row {} has {} cells, expected {}",
                        i + 1,
                        cells.len(),
                        names.len()
                    )));
                }
                cells
                    .iter()
                    .zip(&names)
                    .map(|(cell, name)| {
                        cell.parse::<f64>().map_err(|_| {
                            CalcError::bad_input(format!(
                                "records column {name} has non-numeric cell {cell}"
                            ))
                        })
                    })
                    .collect()
            })
            .collect::<Result<_>>()?;

        let mut records = Self::empty(start_year, rows.len())?;
        for (col, name) in names.iter().enumerate() {
            for (row, cells) in rows.iter().enumerate() {
                records.set_input(name, row, cells[col])?;
            }
        }

        for (row, &w) in records.s006.iter().enumerate() {
            if w < 0.0 {
                return Err(CalcError::bad_input(format!(
                    "record {} has negative weight s006={w}",
                    records.recid[row]
                )));
            }
        }
        Ok(records)
    }

    fn set_input(&mut self, name: &str, row: usize, value: f64) -> Result<()> {
        if INTEGER_COLUMNS.contains(&name) && value.fract() != 0.0 {
            return Err(CalcError::bad_input(format!(
                "records column {name} expects integer values, got {value}"
            )));
        }
        match name {
            "RECID" => self.recid[row] = value as u64,
            "MARS" => {
                if !(1.0..=5.0).contains(&value) {
                    return Err(CalcError::bad_input(format!(
                        "records column MARS must be in 1..=5, got {value}"
                    )));
                }
                self.mars[row] = value as u8;
            }
            "XTOT" => self.xtot[row] = value as u32,
            "n24" => self.n24[row] = value as u32,
            "EIC" => {
                if !(0.0..=3.0).contains(&value) {
                    return Err(CalcError::bad_input(format!(
                        "records column EIC must be in 0..=3, got {value}"
                    )));
                }
                self.eic[row] = value as u32;
            }
            "age_head" => self.age_head[row] = value as u32,
            "FLPDYR" => self.flpdyr[row] = value as u16,
            "s006" => self.s006[row] = value,
            _ => *self
                .money_column_mut(name)
                .ok_or_else(|| CalcError::bad_input(format!("unknown records column {name}")))?
                .get_mut(row)
                .expect("row index in range") = value,
        }
        Ok(())
    }

    fn money_column_mut(&mut self, name: &str) -> Option<&mut Vec<f64>> {
        Some(match name {
            "e00200" => &mut self.e00200,
            "e00300" => &mut self.e00300,
            "e00400" => &mut self.e00400,
            "e00600" => &mut self.e00600,
            "e00650" => &mut self.e00650,
            "e00900" => &mut self.e00900,
            "e01700" => &mut self.e01700,
            "e02000" => &mut self.e02000,
            "e02300" => &mut self.e02300,
            "e02400" => &mut self.e02400,
            "p22250" => &mut self.p22250,
            "p23250" => &mut self.p23250,
            "e17500" => &mut self.e17500,
            "e18400" => &mut self.e18400,
            "e18500" => &mut self.e18500,
            "e19200" => &mut self.e19200,
            "e19800" => &mut self.e19800,
            "e20100" => &mut self.e20100,
            "e20400" => &mut self.e20400,
            "e32800" => &mut self.e32800,
            _ => return None,
        })
    }

    /// Read-only access to a money input or output column by schema name.
    pub fn column(&self, name: &str) -> Result<&[f64]> {
        let col: &Vec<f64> = match name {
            "s006" => &self.s006,
            "e00200" => &self.e00200,
            "e00300" => &self.e00300,
            "e00400" => &self.e00400,
            "e00600" => &self.e00600,
            "e00650" => &self.e00650,
            "e00900" => &self.e00900,
            "e01700" => &self.e01700,
            "e02000" => &self.e02000,
            "e02300" => &self.e02300,
            "e02400" => &self.e02400,
            "p22250" => &self.p22250,
            "p23250" => &self.p23250,
            "e17500" => &self.e17500,
            "e18400" => &self.e18400,
            "e18500" => &self.e18500,
            "e19200" => &self.e19200,
            "e19800" => &self.e19800,
            "e20100" => &self.e20100,
            "e20400" => &self.e20400,
            "e32800" => &self.e32800,
            "sey" => &self.sey,
            "payrolltax" => &self.payrolltax,
            "ptax_was" => &self.ptax_was,
            "setax" => &self.setax,
            "ptax_amc" => &self.ptax_amc,
            "c02500" => &self.c02500,
            "c00100" => &self.c00100,
            "pre_c04600" => &self.pre_c04600,
            "c04600" => &self.c04600,
            "c04470" => &self.c04470,
            "standard" => &self.standard,
            "c04800" => &self.c04800,
            "taxbc" => &self.taxbc,
            "c62100" => &self.c62100,
            "c09600" => &self.c09600,
            "c07220" => &self.c07220,
            "eitc" => &self.eitc,
            "iitax" => &self.iitax,
            "combined" => &self.combined,
            "expanded_income" => &self.expanded_income,
            other => {
                return Err(CalcError::bad_input(format!("unknown column {other}")));
            }
        };
        Ok(col)
    }

    pub fn current_year(&self) -> u16 {
        self.current_year
    }

    pub fn dim(&self) -> usize {
        self.recid.len()
    }

    /// Advance all records by one year: age every input column by its
    /// grow-factor ratio, apply consumption scaling, and zero the output
    /// columns so stale values cannot leak into the next evaluation.
    pub fn increment_year(
        &mut self,
        growfactors: &GrowFactors,
        consumption: &Consumption,
    ) -> Result<()> {
        let next = self.current_year + 1;
        if next > END_YEAR_LONG {
            return Err(CalcError::bad_input(format!(
                "cannot advance records beyond {END_YEAR_LONG}"
            )));
        }

        for (column, series) in AGED_COLUMNS {
            let ratio = growfactors.aging_ratio(series, next)?;
            let col = match column {
                "s006" => &mut self.s006,
                other => self.money_column_mut(other).expect("aged columns are money"),
            };
            for v in col.iter_mut() {
                *v *= ratio;
            }
        }

        for column in CONSUMPTION_COLUMNS {
            let scale = consumption.scale(column, next)?;
            if scale != 1.0 {
                let col = self.money_column_mut(column).expect("consumption columns are money");
                for v in col.iter_mut() {
                    *v *= scale;
                }
            }
        }

        self.current_year = next;
        for y in self.flpdyr.iter_mut() {
            *y = next;
        }
        self.zero_outputs();
        Ok(())
    }

    fn zero_outputs(&mut self) {
        for name in OUTPUT_COLUMNS {
            let col: &mut Vec<f64> = match name {
                "sey" => &mut self.sey,
                "payrolltax" => &mut self.payrolltax,
                "ptax_was" => &mut self.ptax_was,
                "setax" => &mut self.setax,
                "ptax_amc" => &mut self.ptax_amc,
                "c02500" => &mut self.c02500,
                "c00100" => &mut self.c00100,
                "pre_c04600" => &mut self.pre_c04600,
                "c04600" => &mut self.c04600,
                "c04470" => &mut self.c04470,
                "standard" => &mut self.standard,
                "c04800" => &mut self.c04800,
                "taxbc" => &mut self.taxbc,
                "c62100" => &mut self.c62100,
                "c09600" => &mut self.c09600,
                "c07220" => &mut self.c07220,
                "eitc" => &mut self.eitc,
                "iitax" => &mut self.iitax,
                "combined" => &mut self.combined,
                "expanded_income" => &mut self.expanded_income,
                _ => unreachable!("output column list is closed"),
            };
            col.iter_mut().for_each(|v| *v = 0.0);
        }
    }

    /// Assign globally unique identifiers: filers become
    /// `original * 10 + duplicate_index`, non-filers (original id 0) become
    /// `4_000_000 + duplicate_index`.
    pub fn renumber_ids(&mut self) {
        let mut filer_dups: BTreeMap<u64, u64> = BTreeMap::new();
        let mut nonfiler_dups: u64 = 0;
        for id in self.recid.iter_mut() {
            if *id > 0 {
                let dup = filer_dups.entry(*id).or_insert(0);
                let new_id = *id * 10 + *dup;
                *dup += 1;
                *id = new_id;
            } else {
                *id = NONFILER_RECID_BASE + nonfiler_dups;
                nonfiler_dups += 1;
            }
        }
    }

    /// Output dump: input row order and RECID, full output schema.
    pub fn dump_csv(&self) -> String {
        let mut out = String::from("RECID");
        for name in OUTPUT_COLUMNS {
            out.push(',');
            out.push_str(name);
        }
        out.push('\n');
        for row in 0..self.dim() {
            out.push_str(&self.recid[row].to_string());
            for name in OUTPUT_COLUMNS {
                let col = self.column(name).expect("output column list is closed");
                out.push_str(&format!(",{:.2}", col[row]));
            }
            out.push('\n');
        }
        out
    }
}

fn is_input_column(name: &str) -> bool {
    INTEGER_COLUMNS.contains(&name) || AGED_COLUMNS.iter().any(|(c, _)| *c == name)
}
