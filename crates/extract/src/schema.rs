use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Name the schema is registered under in structured-output requests.
pub const SCHEMA_NAME: &str = "change_in_account_value";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
}

impl FieldType {
    fn json_type(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
        }
    }
}

/// Field name, type and description of every column in the table.
pub const FIELDS: &[(&str, FieldType, &str)] = &[
    (
        "reporting_period_start_date",
        FieldType::String,
        "The start date for the time period over which the account value change is being reported. In the format YYYY-MM-DD.",
    ),
    (
        "reporting_period_end_date",
        FieldType::String,
        "The end date for the time period over which the account value change is being reported. In the format YYYY-MM-DD.",
    ),
    (
        "starting_value",
        FieldType::Number,
        "The value of the account at the start of the period.",
    ),
    (
        "credits",
        FieldType::Number,
        "Total credits (deposits, contributions, etc.) added to the account during the period.",
    ),
    (
        "debits",
        FieldType::Number,
        "Total debits (withdrawals, distributions, etc.) taken from the account during the period.",
    ),
    (
        "transfer_of_securities",
        FieldType::Number,
        "The value of securities transferred in or out of the account during the period.",
    ),
    (
        "transaction_costs_fees_and_charges",
        FieldType::Number,
        "The total transaction costs, fees, and charges incurred during the period.",
    ),
    (
        "income_reinvested",
        FieldType::Number,
        "Income generated by the account that was reinvested during the period.",
    ),
    (
        "change_in_investment_value",
        FieldType::Number,
        "The change in the value of investments due to market performance.",
    ),
    (
        "accrued_income",
        FieldType::Number,
        "The total income accrued during the period, such as interest or dividends.",
    ),
    (
        "ending_value_with_accrued_income",
        FieldType::Number,
        "The final value of the account at the end of the period, including accrued income.",
    ),
    (
        "ending_value",
        FieldType::Number,
        "The value of the account at the end of the period, excluding accrued income.",
    ),
    (
        "total_change_in_value",
        FieldType::Number,
        "The overall change in the account value during the period, including deposits, withdrawals and any accrued income.",
    ),
];

/// The "change in account value" table of one brokerage statement.
/// Every field is optional; statements rarely carry all of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangeInAccountValue {
    #[serde(default)]
    pub reporting_period_start_date: Option<String>,
    #[serde(default)]
    pub reporting_period_end_date: Option<String>,
    #[serde(default)]
    pub starting_value: Option<f64>,
    #[serde(default)]
    pub credits: Option<f64>,
    #[serde(default)]
    pub debits: Option<f64>,
    #[serde(default)]
    pub transfer_of_securities: Option<f64>,
    #[serde(default)]
    pub transaction_costs_fees_and_charges: Option<f64>,
    #[serde(default)]
    pub income_reinvested: Option<f64>,
    #[serde(default)]
    pub change_in_investment_value: Option<f64>,
    #[serde(default)]
    pub accrued_income: Option<f64>,
    #[serde(default)]
    pub ending_value_with_accrued_income: Option<f64>,
    #[serde(default)]
    pub ending_value: Option<f64>,
    #[serde(default)]
    pub total_change_in_value: Option<f64>,
}

impl ChangeInAccountValue {
    /// JSON Schema of the record: an object whose properties are all
    /// nullable and default to null.
    pub fn json_schema() -> Value {
        let mut properties = Map::new();

        for (name, field_type, description) in FIELDS {
            properties.insert(
                name.to_string(),
                json!({
                    "anyOf": [{"type": field_type.json_type()}, {"type": "null"}],
                    "default": null,
                    "description": description,
                    "title": title_case(name),
                }),
            );
        }

        json!({
            "title": "ChangeInAccountValue",
            "type": "object",
            "properties": properties,
        })
    }

    /// Parse model output as a schema-conformant record. Unknown keys or
    /// mistyped values yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    pub fn field_names() -> impl Iterator<Item = &'static str> {
        FIELDS.iter().map(|(name, _, _)| *name)
    }
}

fn title_case(field: &str) -> String {
    field
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
