use super::policy::TaxParams;
use super::records::Records;

/// Net earnings fraction of self-employment income subject to SECA.
const SECA_NET_EARNINGS_FACTOR: f64 = 0.9235;

/// The fixed evaluation order of the tax-formula DAG. The Calculator runs
/// these in sequence; each stage reads only columns written by earlier
/// stages (or raw inputs) and writes its own outputs.
pub const DAG_ORDER: [(&str, fn(&TaxParams, &mut Records)); 9] = [
    ("adjustments", adjustments),
    ("agi", adjusted_gross_income),
    ("itemized_and_standard", itemized_and_standard),
    ("taxable_income", taxable_income),
    ("regular_tax", regular_tax),
    ("amt", alternative_minimum_tax),
    ("credits", credits),
    ("payroll", payroll_tax),
    ("final_liability", final_liability),
];

fn mars_idx(mars: u8) -> usize {
    (mars.clamp(1, 5) - 1) as usize
}

fn seca_base(sey: f64) -> f64 {
    (SECA_NET_EARNINGS_FACTOR * sey).max(0.0)
}

/// Self-employment income and the SECA tax it generates; half of the SECA
/// tax is an above-the-line adjustment in the AGI stage.
pub fn adjustments(p: &TaxParams, r: &mut Records) {
    for i in 0..r.dim() {
        let sey = r.e00900[i];
        let base = seca_base(sey);
        let wage_taxed = r.e00200[i].min(p.ss_earnings_c);
        let ss_room = (p.ss_earnings_c - wage_taxed).max(0.0);
        let setax_ss = p.fica_ss_trt * base.min(ss_room);
        let setax_mc = p.fica_mc_trt * base;
        r.sey[i] = sey;
        r.setax[i] = setax_ss + setax_mc;
    }
}

fn capital_loss_limit(mars: u8) -> f64 {
    if mars == 3 { 1500.0 } else { 3000.0 }
}

fn capped_net_gains(short: f64, long: f64, mars: u8) -> f64 {
    let net = short + long;
    if net >= 0.0 {
        net
    } else {
        net.max(-capital_loss_limit(mars))
    }
}

fn taxable_social_security(benefits: f64, provisional: f64, thd50: f64, thd85: f64) -> f64 {
    if benefits <= 0.0 || provisional <= thd50 {
        return 0.0;
    }
    if provisional <= thd85 {
        (0.5 * (provisional - thd50)).min(0.5 * benefits)
    } else {
        let tier1 = (0.5 * (thd85 - thd50)).min(0.5 * benefits);
        (0.85 * (provisional - thd85) + tier1).min(0.85 * benefits)
    }
}

/// Total income, the taxable social-security worksheet, and AGI.
pub fn adjusted_gross_income(p: &TaxParams, r: &mut Records) {
    for i in 0..r.dim() {
        let m = mars_idx(r.mars[i]);
        let gains = capped_net_gains(r.p22250[i], r.p23250[i], r.mars[i]);
        let ymod1 = r.e00200[i]
            + r.e00300[i]
            + r.e00600[i]
            + r.e01700[i]
            + r.e02000[i]
            + r.e02300[i]
            + gains
            + r.sey[i]
            - 0.5 * r.setax[i];
        let provisional = ymod1 + r.e00400[i] + 0.5 * r.e02400[i];
        r.c02500[i] =
            taxable_social_security(r.e02400[i], provisional, p.ss_thd50[m], p.ss_thd85[m]);
        r.c00100[i] = ymod1 + r.c02500[i];
    }
}

fn itemized_components(p: &TaxParams, r: &Records, i: usize) -> (f64, f64, f64, f64, f64) {
    let agi = r.c00100[i];
    let medical = (r.e17500[i] - p.id_medical_frt * agi).max(0.0);
    let salt = r.e18400[i] + r.e18500[i];
    let interest = r.e19200[i];
    let charity = (r.e19800[i] + r.e20100[i]).min(p.id_charity_crt_all * agi.max(0.0));
    let misc = (r.e20400[i] - p.id_miscellaneous_frt * agi).max(0.0);
    (medical, salt, interest, charity, misc)
}

/// Itemized deductions with per-category floors and ceilings and the
/// overall limitation, plus the standard deduction with the aged extra.
pub fn itemized_and_standard(p: &TaxParams, r: &mut Records) {
    for i in 0..r.dim() {
        let m = mars_idx(r.mars[i]);
        let agi = r.c00100[i];
        let (medical, salt, interest, charity, misc) = itemized_components(p, r, i);
        let gross = medical + salt + interest + charity + misc;
        // Medical expenses are exempt from the overall limitation.
        let limited_base = salt + interest + charity + misc;
        let reduction = if agi > p.id_ps[m] {
            (p.id_prt * (agi - p.id_ps[m])).min(p.id_crt * limited_base)
        } else {
            0.0
        };
        r.c04470[i] = (gross - reduction).max(0.0);
        let aged = if r.age_head[i] >= 65 { p.std_aged[m] } else { 0.0 };
        r.standard[i] = p.std[m] + aged;
    }
}

/// Personal exemptions with the phaseout, then taxable income.
pub fn taxable_income(p: &TaxParams, r: &mut Records) {
    for i in 0..r.dim() {
        let m = mars_idx(r.mars[i]);
        let agi = r.c00100[i];
        let pre = r.xtot[i] as f64 * p.ii_em;
        r.pre_c04600[i] = pre;
        let phased = if agi > p.ii_em_ps[m] {
            let steps = ((agi - p.ii_em_ps[m]) / 2500.0).ceil();
            let fraction = (steps * p.ii_prt).min(1.0);
            pre * (1.0 - fraction)
        } else {
            pre
        };
        r.c04600[i] = phased.max(0.0);
        let deduction = r.standard[i].max(r.c04470[i]);
        r.c04800[i] = (agi - deduction - r.c04600[i]).max(0.0);
    }
}

fn ordinary_rates_tax(ti: f64, rates: &[f64; 7], brackets: &[f64; 6]) -> f64 {
    let mut tax = 0.0;
    let mut lower = 0.0;
    for k in 0..6 {
        let upper = brackets[k].max(lower);
        tax += (ti.min(upper) - lower).max(0.0) * rates[k];
        lower = upper;
    }
    tax + (ti - lower).max(0.0) * rates[6]
}

/// Preferential income stacks on top of ordinary income across the
/// capital-gains brackets.
fn stacked_gains_tax(pref: f64, ordinary: f64, p: &TaxParams, m: usize) -> f64 {
    if pref <= 0.0 {
        return 0.0;
    }
    let at_rt1 = (p.cg_brk1[m] - ordinary).max(0.0).min(pref);
    let stack = (ordinary + at_rt1).max(p.cg_brk1[m]);
    let at_rt2 = (p.cg_brk2[m] - stack).max(0.0).min(pref - at_rt1);
    let at_rt3 = pref - at_rt1 - at_rt2;
    at_rt1 * p.cg_rt1 + at_rt2 * p.cg_rt2 + at_rt3 * p.cg_rt3
}

fn preferential_income(r: &Records, i: usize) -> f64 {
    // Long-term gains net of short-term losses, plus qualified dividends.
    (r.p23250[i] + r.p22250[i].min(0.0)).max(0.0) + r.e00650[i]
}

/// Regular tax before credits: seven ordinary brackets with the
/// preferential-rate carve-out for capital gains and qualified dividends.
pub fn regular_tax(p: &TaxParams, r: &mut Records) {
    for i in 0..r.dim() {
        let m = mars_idx(r.mars[i]);
        let brackets = bracket_column(p, m);
        let pref = preferential_income(r, i).min(r.c04800[i]);
        let ordinary = r.c04800[i] - pref;
        r.taxbc[i] = ordinary_rates_tax(ordinary, &p.ii_rt, &brackets)
            + stacked_gains_tax(pref, ordinary, p, m);
    }
}

fn bracket_column(p: &TaxParams, m: usize) -> [f64; 6] {
    [
        p.ii_brk[0][m],
        p.ii_brk[1][m],
        p.ii_brk[2][m],
        p.ii_brk[3][m],
        p.ii_brk[4][m],
        p.ii_brk[5][m],
    ]
}

/// AMT income reconstruction, exemption phaseout, and the two-rate
/// tentative tax with the same preferential-rate carve-out.
pub fn alternative_minimum_tax(p: &TaxParams, r: &mut Records) {
    for i in 0..r.dim() {
        let m = mars_idx(r.mars[i]);
        let itemizing = r.c04470[i] > r.standard[i];
        let addback = if itemizing {
            let (_, salt, _, _, misc) = itemized_components(p, r, i);
            salt + misc
        } else {
            r.standard[i]
        };
        let amti = r.c04800[i] + r.c04600[i] + addback;
        r.c62100[i] = amti;

        let exemption =
            (p.amt_em[m] - p.amt_prt * (amti - p.amt_em_ps[m]).max(0.0)).max(0.0);
        let base = (amti - exemption).max(0.0);
        let pref = preferential_income(r, i).min(base);
        let ordinary = base - pref;
        let tentative = p.amt_rt1 * ordinary.min(p.amt_brk1)
            + p.amt_rt2 * (ordinary - p.amt_brk1).max(0.0)
            + stacked_gains_tax(pref, ordinary, p, m);
        r.c09600[i] = (tentative - r.taxbc[i]).max(0.0);
    }
}

fn child_tax_credit(p: &TaxParams, agi: f64, n24: u32, m: usize, tax_cap: f64) -> f64 {
    let pre = p.ctc_c * n24 as f64;
    if pre <= 0.0 {
        return 0.0;
    }
    let reduced = if agi > p.ctc_ps[m] {
        // The phaseout is assessed in whole 1000-dollar steps.
        let steps = ((agi - p.ctc_ps[m]) / 1000.0).ceil();
        (pre - steps * p.ctc_prt * 1000.0).max(0.0)
    } else {
        pre
    };
    reduced.min(tax_cap)
}

fn earned_income_credit(p: &TaxParams, r: &Records, i: usize) -> f64 {
    let invest = r.e00300[i]
        + r.e00400[i]
        + r.e00600[i]
        + (r.p22250[i] + r.p23250[i]).max(0.0);
    if invest > p.eitc_invest_c {
        return 0.0;
    }
    let k = (r.eic[i] as usize).min(3);
    let earned = r.e00200[i] + seca_base(r.sey[i]);
    let base = (p.eitc_rt[k] * earned).min(p.eitc_c[k]);
    let married_add = if r.mars[i] == 2 {
        p.eitc_ps_married[k]
    } else {
        0.0
    };
    let phaseout_start = p.eitc_ps[k] + married_add;
    let phaseout_income = r.c00100[i].max(earned);
    if phaseout_income > phaseout_start {
        (base - p.eitc_prt[k] * (phaseout_income - phaseout_start)).max(0.0)
    } else {
        base
    }
}

/// Child tax credit (nonrefundable) and earned income credit (refundable).
pub fn credits(p: &TaxParams, r: &mut Records) {
    for i in 0..r.dim() {
        let m = mars_idx(r.mars[i]);
        let tax_cap = r.taxbc[i] + r.c09600[i];
        r.c07220[i] = child_tax_credit(p, r.c00100[i], r.n24[i], m, tax_cap);
        r.eitc[i] = earned_income_credit(p, r, i);
    }
}

/// FICA on wages plus the SECA amounts computed in the adjustments stage,
/// plus the additional Medicare tax.
pub fn payroll_tax(p: &TaxParams, r: &mut Records) {
    for i in 0..r.dim() {
        let m = mars_idx(r.mars[i]);
        r.ptax_was[i] =
            p.fica_ss_trt * r.e00200[i].min(p.ss_earnings_c) + p.fica_mc_trt * r.e00200[i];
        let medicare_earnings = r.e00200[i] + seca_base(r.sey[i]);
        r.ptax_amc[i] = p.amedt_rt * (medicare_earnings - p.amedt_ec[m]).max(0.0);
        r.payrolltax[i] = r.ptax_was[i] + r.setax[i] + r.ptax_amc[i];
    }
}

/// Income tax after credits, combined liability, and expanded income.
pub fn final_liability(_p: &TaxParams, r: &mut Records) {
    for i in 0..r.dim() {
        r.iitax[i] = (r.taxbc[i] + r.c09600[i] - r.c07220[i]).max(0.0) - r.eitc[i];
        r.combined[i] = r.iitax[i] + r.payrolltax[i];
        r.expanded_income[i] =
            r.c00100[i] + r.e00400[i] + (r.e02400[i] - r.c02500[i]).max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::Policy;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn params_2013() -> TaxParams {
        let mut policy = Policy::current_law().expect("baseline loads");
        policy.set_year(2013).unwrap();
        policy.tax_params().unwrap()
    }

    fn single_wage_records(wages: &[f64]) -> Records {
        let mut csv = String::from("RECID,MARS,e00200,s006\n");
        for (i, w) in wages.iter().enumerate() {
            csv.push_str(&format!("{},1,{w},1\n", i + 1));
        }
        Records::from_csv(&csv, 2013).unwrap()
    }

    fn run_all(p: &TaxParams, r: &mut Records) {
        for (_, f) in DAG_ORDER {
            f(p, r);
        }
    }

    #[test]
    fn ordinary_rates_tax_matches_hand_computation() {
        let p = params_2013();
        let brackets = bracket_column(&p, 0);
        // 50_000 single in 2013: 8925 at 10%, the rest of the 15% band,
        // and the remainder at 25%.
        let expected = 8925.0 * 0.10 + (36_250.0 - 8925.0) * 0.15 + (50_000.0 - 36_250.0) * 0.25;
        assert_approx(ordinary_rates_tax(50_000.0, &p.ii_rt, &brackets), expected);
        assert_approx(ordinary_rates_tax(0.0, &p.ii_rt, &brackets), 0.0);
        assert_approx(ordinary_rates_tax(5000.0, &p.ii_rt, &brackets), 500.0);
    }

    #[test]
    fn stacked_gains_straddle_all_three_rates() {
        let p = params_2013();
        // Single filer: cg_brk1 = 36_250, cg_brk2 = 400_000.
        let tax = stacked_gains_tax(410_000.0, 20_000.0, &p, 0);
        let at0 = 36_250.0 - 20_000.0;
        let at15 = 400_000.0 - 36_250.0;
        let at20 = 410_000.0 - at0 - at15;
        assert_approx(tax, at15 * 0.15 + at20 * 0.20);
        assert_approx(stacked_gains_tax(10_000.0, 0.0, &p, 0), 0.0);
    }

    #[test]
    fn taxable_social_security_worksheet_tiers() {
        // Below the first threshold nothing is taxable.
        assert_approx(taxable_social_security(10_000.0, 20_000.0, 25_000.0, 34_000.0), 0.0);
        // Between thresholds: half the excess, capped at half the benefit.
        assert_approx(
            taxable_social_security(10_000.0, 30_000.0, 25_000.0, 34_000.0),
            2500.0
        );
        // Above the second threshold: 85 percent tier plus the tier-1 part,
        // capped at 85 percent of benefits.
        let got = taxable_social_security(10_000.0, 60_000.0, 25_000.0, 34_000.0);
        assert_approx(got, 8500.0);
    }

    #[test]
    fn seca_applies_only_to_positive_self_employment() {
        let p = params_2013();
        let csv = "RECID,MARS,e00900,s006\n1,1,-20000,1\n2,1,40000,1\n";
        let mut r = Records::from_csv(csv, 2013).unwrap();
        adjustments(&p, &mut r);
        assert_approx(r.setax[0], 0.0);
        let base = 0.9235 * 40_000.0;
        assert_approx(r.setax[1], base * (0.124 + 0.029));
    }

    #[test]
    fn seca_social_security_part_respects_wage_base() {
        let p = params_2013();
        // Wages already fill the taxable maximum, so only the Medicare part
        // of SECA remains.
        let csv = "RECID,MARS,e00200,e00900,s006\n1,1,120000,40000,1\n";
        let mut r = Records::from_csv(csv, 2013).unwrap();
        adjustments(&p, &mut r);
        assert_approx(r.setax[0], 0.029 * 0.9235 * 40_000.0);
    }

    #[test]
    fn capital_losses_are_capped_in_agi() {
        let p = params_2013();
        let csv = "RECID,MARS,p22250,s006\n1,1,-50000,1\n2,3,-50000,1\n";
        let mut r = Records::from_csv(csv, 2013).unwrap();
        run_all(&p, &mut r);
        assert_approx(r.c00100[0], -3000.0);
        assert_approx(r.c00100[1], -1500.0);
    }

    #[test]
    fn standard_deduction_with_aged_extra() {
        let p = params_2013();
        let csv = "RECID,MARS,age_head,e00200,s006\n1,1,40,30000,1\n2,1,70,30000,1\n";
        let mut r = Records::from_csv(csv, 2013).unwrap();
        run_all(&p, &mut r);
        assert_approx(r.standard[0], 6100.0);
        assert_approx(r.standard[1], 6100.0 + 1500.0);
        assert!(r.c04800[1] < r.c04800[0]);
    }

    #[test]
    fn itemizer_beats_standard_when_larger() {
        let p = params_2013();
        let csv =
            "RECID,MARS,e00200,e18400,e19200,s006\n1,1,80000,9000,6000,1\n";
        let mut r = Records::from_csv(csv, 2013).unwrap();
        run_all(&p, &mut r);
        assert_approx(r.c04470[0], 15_000.0);
        // Deduction used is the larger of standard and itemized.
        assert_approx(r.c04800[0], 80_000.0 - 15_000.0 - 3900.0);
    }

    #[test]
    fn pease_limitation_reduces_itemized() {
        let p = params_2013();
        let agi = 350_000.0;
        let csv = format!("RECID,MARS,e00200,e19800,s006\n1,1,{agi},30000,1\n");
        let mut r = Records::from_csv(&csv, 2013).unwrap();
        run_all(&p, &mut r);
        let reduction = 0.03 * (agi - 250_000.0);
        assert_approx(r.c04470[0], 30_000.0 - reduction);
    }

    #[test]
    fn exemption_phaseout_follows_2500_steps() {
        let p = params_2013();
        let csv = "RECID,MARS,XTOT,e00200,s006\n1,1,2,260000,1\n";
        let mut r = Records::from_csv(csv, 2013).unwrap();
        run_all(&p, &mut r);
        assert_approx(r.pre_c04600[0], 2.0 * 3900.0);
        // 10_000 over the start is four full 2500 steps: 8 percent lost.
        let expected = 2.0 * 3900.0 * (1.0 - 4.0 * 0.02);
        assert_approx(r.c04600[0], expected);
    }

    #[test]
    fn child_credit_phases_out_in_thousand_steps() {
        let p = params_2013();
        let csv = "RECID,MARS,n24,XTOT,e00200,s006\n1,2,2,4,112500,1\n2,2,2,4,60000,1\n";
        let mut r = Records::from_csv(csv, 2013).unwrap();
        run_all(&p, &mut r);
        // 2500 over the joint threshold rounds up to three 1000 steps.
        assert_approx(r.c07220[0], 2000.0 - 3.0 * 50.0);
        assert_approx(r.c07220[1], 2000.0);
    }

    #[test]
    fn eitc_phases_in_and_out() {
        let p = params_2013();
        let csv = "RECID,MARS,EIC,e00200,s006\n\
                   1,1,1,5000,1\n\
                   2,1,1,12000,1\n\
                   3,1,1,30000,1\n\
                   4,1,1,60000,1\n";
        let mut r = Records::from_csv(csv, 2013).unwrap();
        run_all(&p, &mut r);
        assert_approx(r.eitc[0], 0.34 * 5000.0);
        assert_approx(r.eitc[1], 3250.0);
        assert_approx(r.eitc[2], 3250.0 - 0.1598 * (30_000.0 - 17_530.0));
        assert_approx(r.eitc[3], 0.0);
    }

    #[test]
    fn eitc_denied_on_excess_investment_income() {
        let p = params_2013();
        let csv = "RECID,MARS,EIC,e00200,e00300,s006\n1,1,1,12000,4000,1\n";
        let mut r = Records::from_csv(csv, 2013).unwrap();
        run_all(&p, &mut r);
        assert_approx(r.eitc[0], 0.0);
    }

    #[test]
    fn payroll_tax_respects_wage_base_and_surtax() {
        let p = params_2013();
        let csv = "RECID,MARS,e00200,s006\n1,1,50000,1\n2,1,250000,1\n";
        let mut r = Records::from_csv(csv, 2013).unwrap();
        run_all(&p, &mut r);
        assert_approx(r.ptax_was[0], 50_000.0 * (0.124 + 0.029));
        assert_approx(
            r.ptax_was[1],
            113_700.0 * 0.124 + 250_000.0 * 0.029
        );
        assert_approx(r.ptax_amc[1], 0.009 * (250_000.0 - 200_000.0));
    }

    #[test]
    fn amt_excess_over_regular_is_nonnegative() {
        let p = params_2013();
        // Heavy state-tax itemizer: the classic AMT trigger.
        let csv = "RECID,MARS,e00200,e18400,s006\n1,1,300000,60000,1\n";
        let mut r = Records::from_csv(csv, 2013).unwrap();
        run_all(&p, &mut r);
        assert!(r.c09600[0] > 0.0);
        assert!(r.c62100[0] > r.c04800[0]);
    }

    #[test]
    fn refundable_eitc_makes_iitax_negative() {
        let p = params_2013();
        let csv = "RECID,MARS,EIC,e00200,s006\n1,1,2,12000,1\n";
        let mut r = Records::from_csv(csv, 2013).unwrap();
        run_all(&p, &mut r);
        assert!(r.iitax[0] < 0.0);
        assert_approx(r.combined[0], r.iitax[0] + r.payrolltax[0]);
    }

    #[test]
    fn regular_tax_increases_with_wages() {
        let p = params_2013();
        let mut r = single_wage_records(&[50_000.0, 150_000.0, 500_000.0]);
        run_all(&p, &mut r);
        assert!(r.taxbc[0] < r.taxbc[1]);
        assert!(r.taxbc[1] < r.taxbc[2]);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_ordinary_tax_is_monotone_and_bounded(
            lo in 0u32..2_000_000,
            delta in 1u32..500_000
        ) {
            let p = params_2013();
            let brackets = bracket_column(&p, 0);
            let t_lo = ordinary_rates_tax(lo as f64, &p.ii_rt, &brackets);
            let t_hi = ordinary_rates_tax((lo + delta) as f64, &p.ii_rt, &brackets);
            prop_assert!(t_hi >= t_lo);
            // Average rate never exceeds the top marginal rate.
            prop_assert!(t_hi <= 0.396 * (lo + delta) as f64 + 1e-9);
        }

        #[test]
        fn prop_stacked_gains_never_exceed_top_preferential_rate(
            pref in 0u32..2_000_000,
            ordinary in 0u32..1_000_000
        ) {
            let p = params_2013();
            let tax = stacked_gains_tax(pref as f64, ordinary as f64, &p, 0);
            prop_assert!(tax >= 0.0);
            prop_assert!(tax <= 0.20 * pref as f64 + 1e-9);
        }

        #[test]
        fn prop_outputs_are_row_local(
            wage_a in 0u32..500_000,
            wage_b in 0u32..500_000
        ) {
            let p = params_2013();
            let mut pair = single_wage_records(&[wage_a as f64, wage_b as f64]);
            run_all(&p, &mut pair);
            let mut solo = single_wage_records(&[wage_b as f64]);
            run_all(&p, &mut solo);
            prop_assert!((pair.iitax[1] - solo.iitax[0]).abs() < 1e-9);
            prop_assert!((pair.combined[1] - solo.combined[0]).abs() < 1e-9);
        }
    }
}
