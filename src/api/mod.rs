use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    Assumptions, CalcError, Calculator, Measure, Policy, Records, START_YEAR, Table, TableBins,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliMeasure {
    Agi,
    ExpandedIncome,
}

impl From<CliMeasure> for Measure {
    fn from(value: CliMeasure) -> Self {
        match value {
            CliMeasure::Agi => Measure::Agi,
            CliMeasure::ExpandedIncome => Measure::ExpandedIncome,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "taxcalc",
    about = "Federal individual income tax microsimulation (baseline law + reforms over a filer cross-section)"
)]
pub struct Cli {
    /// Filer records CSV (header row of schema column names).
    pub input: PathBuf,
    #[arg(long, help = "Calendar year to advance to and calculate")]
    pub year: u16,
    #[arg(long, help = "Reform JSON file: {year: {parameter: value}}")]
    pub reform: Option<PathBuf>,
    #[arg(long, help = "Growth-difference assumption JSON file")]
    pub growdiff: Option<PathBuf>,
    #[arg(long, help = "Consumption assumption JSON file")]
    pub consumption: Option<PathBuf>,
    #[arg(
        long,
        help = "Print the full distribution table instead of only the aggregate row"
    )]
    pub tables: bool,
    #[arg(long, help = "Write per-record outputs to this CSV file")]
    pub dump: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = CliMeasure::Agi)]
    measure: CliMeasure,
    #[arg(
        long,
        help = "Renumber RECIDs to be globally unique before calculating"
    )]
    pub renumber: bool,
}

fn read_json_file(path: &PathBuf) -> Result<JsonValue, CalcError> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| CalcError::bad_input(format!("{}: invalid JSON: {e}", path.display())))
}

fn build_calculator(
    records_csv: &str,
    reform: Option<&JsonValue>,
    growdiff: Option<&JsonValue>,
    consumption: Option<&JsonValue>,
    renumber: bool,
) -> Result<Calculator, CalcError> {
    let mut assumptions = Assumptions::new()?;
    if let Some(gd) = growdiff {
        assumptions.growdiff.update(gd)?;
    }
    if let Some(c) = consumption {
        assumptions.consumption.update(c)?;
    }

    let mut policy = Policy::current_law()?;
    if let Some(reform) = reform {
        policy.implement_reform(reform)?;
    }

    let mut records = Records::from_csv(records_csv, START_YEAR)?;
    if renumber {
        records.renumber_ids();
    }
    Calculator::new(policy, records, assumptions)
}

/// Run one CLI calculation: advance to the requested year, evaluate, and
/// emit the tables text (the `A` row is the external comparator contract)
/// plus the optional per-record dump.
pub fn run_cli(cli: &Cli) -> Result<(), CalcError> {
    let records_csv = std::fs::read_to_string(&cli.input)?;
    let reform = cli.reform.as_ref().map(read_json_file).transpose()?;
    let growdiff = cli.growdiff.as_ref().map(read_json_file).transpose()?;
    let consumption = cli.consumption.as_ref().map(read_json_file).transpose()?;

    let mut calc = build_calculator(
        &records_csv,
        reform.as_ref(),
        growdiff.as_ref(),
        consumption.as_ref(),
        cli.renumber,
    )?;
    for warning in calc.reform_warnings() {
        warn!("{warning}");
    }

    calc.advance_to_year(cli.year)?;
    calc.calc_all()?;

    let table = calc.distribution_table(&TableBins::WeightedDeciles, cli.measure.into())?;
    if cli.tables {
        print!("{}", table.render_text());
    } else {
        print!("{}", aggregate_line(&table));
    }

    if let Some(path) = &cli.dump {
        std::fs::write(path, calc.dump_csv()?)?;
        info!("wrote dump to {}", path.display());
    }
    Ok(())
}

fn aggregate_line(table: &Table) -> String {
    let all = &table.all;
    format!(
        "{:<4}{:>12.0}{:>16.0}{:>14.0}{:>14.0}\n",
        all.label, all.returns, all.income, all.iitax, all.payrolltax
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CalculatePayload {
    records_csv: String,
    year: Option<u16>,
    reform: Option<JsonValue>,
    growdiff: Option<JsonValue>,
    consumption: Option<JsonValue>,
    renumber: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AggregateResponse {
    returns: f64,
    income: f64,
    iitax: f64,
    payrolltax: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordResponse {
    recid: u64,
    c00100: f64,
    c04800: f64,
    taxbc: f64,
    c09600: f64,
    eitc: f64,
    iitax: f64,
    payrolltax: f64,
    combined: f64,
    expanded_income: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CalculateResponse {
    year: u16,
    aggregate: AggregateResponse,
    records: Vec<RecordResponse>,
    warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ParametersQuery {
    year: Option<u16>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParametersResponse {
    year: u16,
    parameters: serde_json::Map<String, JsonValue>,
}

fn calculate_response(payload: CalculatePayload) -> Result<CalculateResponse, CalcError> {
    let year = payload.year.unwrap_or(START_YEAR);
    let mut calc = build_calculator(
        &payload.records_csv,
        payload.reform.as_ref(),
        payload.growdiff.as_ref(),
        payload.consumption.as_ref(),
        payload.renumber.unwrap_or(false),
    )?;
    let warnings = calc.reform_warnings().to_vec();
    calc.advance_to_year(year)?;
    calc.calc_all()?;

    let table = calc.distribution_table(&TableBins::WeightedDeciles, Measure::Agi)?;
    let records = calc.records();
    let rows = (0..records.dim())
        .map(|i| RecordResponse {
            recid: records.recid[i],
            c00100: records.c00100[i],
            c04800: records.c04800[i],
            taxbc: records.taxbc[i],
            c09600: records.c09600[i],
            eitc: records.eitc[i],
            iitax: records.iitax[i],
            payrolltax: records.payrolltax[i],
            combined: records.combined[i],
            expanded_income: records.expanded_income[i],
        })
        .collect();

    Ok(CalculateResponse {
        year,
        aggregate: AggregateResponse {
            returns: table.all.returns,
            income: table.all.income,
            iitax: table.all.iitax,
            payrolltax: table.all.payrolltax,
        },
        records: rows,
        warnings,
    })
}

fn parameters_response(query: ParametersQuery) -> Result<ParametersResponse, CalcError> {
    let year = query.year.unwrap_or(START_YEAR);
    let mut policy = Policy::current_law()?;
    policy.set_year(year)?;

    let mut parameters = serde_json::Map::new();
    let names: Vec<String> = policy.store().names().map(|s| s.to_string()).collect();
    for name in names {
        let values = policy.store().get_vector(&name)?;
        let node = if values.len() == 1 {
            JsonValue::from(values[0])
        } else {
            JsonValue::from(values.to_vec())
        };
        parameters.insert(name, node);
    }
    Ok(ParametersResponse { year, parameters })
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/api/calculate", post(calculate_handler))
        .route("/api/parameters", get(parameters_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!("taxcalc HTTP API listening on http://{addr}");
    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn calculate_handler(Json(payload): Json<CalculatePayload>) -> Response {
    match calculate_response(payload) {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => error_response(status_for(&e), &e.to_string()),
    }
}

async fn parameters_handler(Query(query): Query<ParametersQuery>) -> Response {
    match parameters_response(query) {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => error_response(status_for(&e), &e.to_string()),
    }
}

fn status_for(error: &CalcError) -> StatusCode {
    match error {
        CalcError::BadInput(_) | CalcError::RangeViolation { .. } => StatusCode::BAD_REQUEST,
        CalcError::StateMisuse(_) | CalcError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
