use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::model::*;

use super::{GatewayError, LedgerPartition, RecordStore};

const PARTITION_KEY: &str = "partitionKey";
const CHECK: &str = "check";
const VALUE: &str = "value";
const USER_ID: &str = "userId";
const SURVEY_ID: &str = "surveyId";
const CALENDAR_ID: &str = "calendarId";
const DATE: &str = "date";
const QUOTAS: &str = "quotas";
const RESERVATION_COUNTS: &str = "reservationCounts";
const CATEGORY_TAGS: [&str; 3] = ["tag1", "tag2", "tag3"];
const CATEGORIES_PARTITION: &str = "categories";
const LEDGER_INDEX: &str = "surveyId-partitionKey-index";

/// A DynamoDB attribute value as printed by the AWS CLI.
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) enum AttributeValue {
    S(String),
    N(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    M(BTreeMap<String, AttributeValue>),
    L(Vec<AttributeValue>),
    #[serde(rename = "SS")]
    StringSet(Vec<String>),
    #[serde(rename = "NS")]
    NumberSet(Vec<String>),
    B(String),
    #[serde(rename = "BS")]
    BinarySet(Vec<String>),
}

pub(crate) type Item = BTreeMap<String, AttributeValue>;

#[derive(Debug, Deserialize)]
struct QueryOutput {
    #[serde(rename = "Items", default)]
    items: Vec<Item>,
}

/// CLI output as text. Windows consoles print cp932, so bytes that are not
/// UTF-8 get a second chance as Shift_JIS before being rejected.
pub(crate) fn decode_output(bytes: Vec<u8>) -> Result<String, GatewayError> {
    let bytes = match String::from_utf8(bytes) {
        Ok(text) => return Ok(text),
        Err(e) => e.into_bytes(),
    };
    encoding_rs::SHIFT_JIS
        .decode_without_bom_handling_and_without_replacement(&bytes)
        .map(|text| text.into_owned())
        .ok_or_else(|| GatewayError::MalformedResponse("output is neither UTF-8 nor cp932".into()))
}

pub(crate) fn parse_items(json: &str) -> Result<Vec<Item>, GatewayError> {
    serde_json::from_str::<QueryOutput>(json)
        .map(|out| out.items)
        .map_err(|e| GatewayError::MalformedResponse(e.to_string()))
}

/// String attribute, or `None` if absent or not a string.
fn string_attr<'a>(item: &'a Item, name: &str) -> Option<&'a str> {
    match item.get(name) {
        Some(AttributeValue::S(s)) => Some(s.as_str()),
        _ => None,
    }
}

/// Type a ledger row. Rows without a string partition key cannot be grouped.
pub(crate) fn record_from_item(item: &Item) -> Option<RawRecord> {
    let group_key = string_attr(item, PARTITION_KEY)?;
    Some(RawRecord {
        group_key: group_key.to_string(),
        status: string_attr(item, CHECK).map(str::to_string),
        encoded_slot: string_attr(item, VALUE).map(str::to_string),
        owner_id: string_attr(item, USER_ID).map(str::to_string),
    })
}

fn merge_count_map(
    into: &mut SlotCounts,
    date: &str,
    attr: Option<&AttributeValue>,
    field: &str,
) -> Result<(), GatewayError> {
    into.touch_date(date);
    let map = match attr {
        None => return Ok(()),
        Some(AttributeValue::M(map)) => map,
        Some(other) => {
            return Err(GatewayError::MalformedResponse(format!(
                "{field} on {date} is not a map: {other:?}"
            )));
        }
    };
    for (slot, value) in map {
        let count = match value {
            AttributeValue::N(n) => n.trim().parse::<Count>().map_err(|e| {
                GatewayError::MalformedResponse(format!("{field}[{date}][{slot}] = {n:?}: {e}"))
            })?,
            other => {
                return Err(GatewayError::MalformedResponse(format!(
                    "{field}[{date}][{slot}] is not a number: {other:?}"
                )));
            }
        };
        into.set(date, slot.as_str(), count);
    }
    Ok(())
}

pub(crate) fn summary_from_items(items: &[Item]) -> Result<SummarySnapshot, GatewayError> {
    let mut snapshot = SummarySnapshot::default();
    for item in items {
        // Calendar partitions may hold non-slot rows; only dated rows count.
        let Some(date) = string_attr(item, DATE) else { continue };
        merge_count_map(&mut snapshot.quotas, date, item.get(QUOTAS), QUOTAS)?;
        merge_count_map(
            &mut snapshot.reservation_counts,
            date,
            item.get(RESERVATION_COUNTS),
            RESERVATION_COUNTS,
        )?;
    }
    Ok(snapshot)
}

pub(crate) fn ledger_keys_from_items(items: &[Item], category: &str) -> BTreeSet<String> {
    items
        .iter()
        .filter(|item| string_attr(item, VALUE).is_some_and(|v| v.contains(category)))
        .filter_map(|item| string_attr(item, SURVEY_ID))
        .filter(|id| *id != SURVEY_ID)
        .map(str::to_string)
        .collect()
}

pub(crate) fn label_from_item(item: &Item) -> Option<String> {
    let tags: Vec<&str> = CATEGORY_TAGS
        .iter()
        .filter_map(|t| string_attr(item, t))
        .collect();
    if tags.is_empty() {
        None
    } else {
        Some(tags.join(" > "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsTables {
    /// Summary table: categories and per-calendar slot counts.
    pub calendars: String,
    /// Ledger table: survey results.
    pub results: String,
}

/// Reads both tables through the `aws dynamodb` CLI.
#[derive(Debug, Clone)]
pub struct AwsCliStore {
    program: String,
    leading_args: Vec<String>,
    profile: String,
    tables: AwsTables,
}

impl AwsCliStore {
    pub fn new(profile: impl Into<String>, tables: AwsTables) -> Self {
        Self {
            program: "aws".into(),
            leading_args: Vec::new(),
            profile: profile.into(),
            tables,
        }
    }

    /// Use a different executable in place of `aws`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Run `aws` through a wrapper, e.g. `aws-vault exec prod -- aws`.
    pub fn with_command<I, A>(mut self, program: impl Into<String>, leading_args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.program = program.into();
        self.leading_args = leading_args.into_iter().map(Into::into).collect();
        self
    }

    fn query_args(
        &self,
        table: &str,
        index: Option<&str>,
        key_condition: &str,
        values: serde_json::Value,
    ) -> Vec<String> {
        let mut args = vec![
            "dynamodb".to_string(),
            "query".to_string(),
            "--table-name".to_string(),
            table.to_string(),
        ];
        if let Some(index) = index {
            args.push("--index-name".into());
            args.push(index.into());
        }
        args.extend([
            "--key-condition-expression".to_string(),
            key_condition.to_string(),
            "--expression-attribute-values".to_string(),
            values.to_string(),
            "--profile".to_string(),
            self.profile.clone(),
        ]);
        args
    }

    pub(crate) fn category_args(&self, category: &str) -> Vec<String> {
        self.query_args(
            &self.tables.calendars,
            None,
            "partitionKey=:pkey and sortKey=:skey",
            serde_json::json!({
                ":pkey": { "S": CATEGORIES_PARTITION },
                ":skey": { "S": category },
            }),
        )
    }

    pub(crate) fn summary_args(&self, calendar_id: &str) -> Vec<String> {
        self.query_args(
            &self.tables.calendars,
            None,
            "partitionKey=:pkey",
            serde_json::json!({ ":pkey": { "S": calendar_id } }),
        )
    }

    pub(crate) fn ledger_args(&self, ledger_key: &str) -> Vec<String> {
        self.query_args(
            &self.tables.results,
            Some(LEDGER_INDEX),
            "surveyId=:pkey and begins_with(partitionKey, :skey)",
            serde_json::json!({
                ":pkey": { "S": ledger_key },
                ":skey": { "S": ledger_key },
            }),
        )
    }

    pub(crate) fn scan_args(&self) -> Vec<String> {
        vec![
            "dynamodb".to_string(),
            "scan".to_string(),
            "--table-name".to_string(),
            self.tables.results.clone(),
            "--profile".to_string(),
            self.profile.clone(),
        ]
    }

    async fn run(&self, args: &[String]) -> Result<Vec<Item>, GatewayError> {
        debug!("running {} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(&self.leading_args)
            .args(args)
            .output()
            .await
            .map_err(|e| GatewayError::SourceUnavailable(format!("failed to run {}: {e}", self.program)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GatewayError::SourceUnavailable(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        parse_items(&decode_output(output.stdout)?)
    }

    async fn category_item(&self, category: &str) -> Result<Option<Item>, GatewayError> {
        let items = self.run(&self.category_args(category)).await?;
        Ok(items.into_iter().next())
    }
}

#[async_trait]
impl RecordStore for AwsCliStore {
    async fn resolve_resource_key(&self, category: &str) -> Result<Option<String>, GatewayError> {
        let Some(item) = self.category_item(category).await? else {
            return Ok(None);
        };
        Ok(string_attr(&item, CALENDAR_ID).map(str::to_string))
    }

    async fn describe_category(&self, category: &str) -> Result<Option<String>, GatewayError> {
        Ok(self.category_item(category).await?.as_ref().and_then(label_from_item))
    }

    async fn discover_ledger_keys(&self, category: &str) -> Result<BTreeSet<String>, GatewayError> {
        let items = self.run(&self.scan_args()).await?;
        Ok(ledger_keys_from_items(&items, category))
    }

    async fn fetch_ledger_partition(&self, ledger_key: &str) -> Result<LedgerPartition, GatewayError> {
        let items = self.run(&self.ledger_args(ledger_key)).await?;
        let mut partition = LedgerPartition::default();
        for item in &items {
            match record_from_item(item) {
                Some(record) => partition.records.push(record),
                None => partition.malformed += 1,
            }
        }
        Ok(partition)
    }

    async fn fetch_summary_counts(&self, resource_key: &str) -> Result<SummarySnapshot, GatewayError> {
        let items = self.run(&self.summary_args(resource_key)).await?;
        summary_from_items(&items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> AwsCliStore {
        AwsCliStore::new(
            "dev",
            AwsTables {
                calendars: "SurveyCalendars".into(),
                results: "SurveyResults".into(),
            },
        )
    }

    #[test]
    fn parse_ledger_items() {
        let json = r#"{
            "Items": [
                {
                    "partitionKey": {"S": "s1#0001"},
                    "check": {"S": "予約"},
                    "value": {"S": "category#007385_0|20210522|1"},
                    "userId": {"S": "U123"}
                },
                {
                    "partitionKey": {"S": "s1#0002"},
                    "check": {"N": "1"}
                },
                {
                    "value": {"S": "category#007385_0|20210522|2"}
                }
            ],
            "Count": 3,
            "ScannedCount": 3
        }"#;
        let items = parse_items(json).unwrap();
        assert_eq!(items.len(), 3);

        let first = record_from_item(&items[0]).unwrap();
        assert_eq!(first.group_key, "s1#0001");
        assert_eq!(first.status.as_deref(), Some("予約"));
        assert_eq!(first.owner_id.as_deref(), Some("U123"));

        // Wrong attribute type is treated as absent.
        let second = record_from_item(&items[1]).unwrap();
        assert_eq!(second.status, None);

        // No partition key: rejected at the boundary.
        assert!(record_from_item(&items[2]).is_none());
    }

    #[test]
    fn parse_rejects_non_json() {
        let result = parse_items("An error occurred (ResourceNotFoundException)");
        assert!(matches!(result, Err(GatewayError::MalformedResponse(_))));
    }

    #[test]
    fn parse_missing_items_is_empty() {
        assert!(parse_items(r#"{"Count": 0}"#).unwrap().is_empty());
    }

    #[test]
    fn summary_decoding() {
        let json = r#"{"Items": [
            {
                "partitionKey": {"S": "cal-1"},
                "date": {"S": "20210522"},
                "quotas": {"M": {"1": {"N": "10"}, "2": {"N": "10"}}},
                "reservationCounts": {"M": {"1": {"N": "3"}}}
            },
            {
                "partitionKey": {"S": "cal-1"},
                "date": {"S": "20210523"},
                "quotas": {"M": {}},
                "reservationCounts": {"M": {}}
            },
            {
                "partitionKey": {"S": "cal-1"},
                "sortKey": {"S": "meta"}
            }
        ]}"#;
        let snapshot = summary_from_items(&parse_items(json).unwrap()).unwrap();
        assert_eq!(snapshot.reservation_counts.get("20210522", "1"), 3);
        assert_eq!(snapshot.reservation_counts.get("20210522", "2"), 0);
        assert_eq!(snapshot.quota("20210522", "2"), Some(10));
        assert_eq!(snapshot.reservation_counts.dates().count(), 2);
    }

    #[test]
    fn summary_bad_count_is_malformed() {
        let json = r#"{"Items": [{
            "date": {"S": "20210522"},
            "reservationCounts": {"M": {"1": {"N": "three"}}}
        }]}"#;
        let result = summary_from_items(&parse_items(json).unwrap());
        assert!(matches!(result, Err(GatewayError::MalformedResponse(_))));
    }

    #[test]
    fn summary_keeps_negative_counts() {
        let json = r#"{"Items": [{
            "date": {"S": "20210522"},
            "reservationCounts": {"M": {"1": {"N": "-1"}, "2": {"N": "3"}}}
        }]}"#;
        let snapshot = summary_from_items(&parse_items(json).unwrap()).unwrap();
        assert_eq!(snapshot.reservation_counts.get("20210522", "1"), -1);
        assert_eq!(snapshot.reservation_counts.get("20210522", "2"), 3);
    }

    #[test]
    fn ledger_key_discovery_filters() {
        let json = r#"{"Items": [
            {"surveyId": {"S": "s1"}, "value": {"S": "category#007385_0|20210522|1"}},
            {"surveyId": {"S": "s1"}, "value": {"S": "category#007385_0|20210523|1"}},
            {"surveyId": {"S": "s2"}, "value": {"S": "category#000001_0|20210522|1"}},
            {"surveyId": {"S": "surveyId"}, "value": {"S": "category#007385"}},
            {"surveyId": {"S": "s3"}}
        ]}"#;
        let keys = ledger_keys_from_items(&parse_items(json).unwrap(), "category#007385");
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["s1".to_string()]);
    }

    #[test]
    fn category_label_joins_present_tags() {
        let json = r#"{"Items": [{
            "calendarId": {"S": "cal-1"},
            "tag1": {"S": "Tokyo"},
            "tag2": {"S": "Hall A"},
            "tag3": {"S": "Morning"}
        }]}"#;
        let items = parse_items(json).unwrap();
        assert_eq!(label_from_item(&items[0]).as_deref(), Some("Tokyo > Hall A > Morning"));
        assert_eq!(label_from_item(&Item::new()), None);
    }

    #[test]
    fn ledger_query_uses_index() {
        let args = store().ledger_args("s1");
        assert_eq!(&args[..2], &["dynamodb", "query"]);
        assert!(args.windows(2).any(|w| w[0] == "--index-name" && w[1] == LEDGER_INDEX));
        assert!(args.windows(2).any(|w| w[0] == "--table-name" && w[1] == "SurveyResults"));
        assert_eq!(args.last().map(String::as_str), Some("dev"));

        let values_pos = args
            .iter()
            .position(|a| a == "--expression-attribute-values")
            .unwrap();
        let values: serde_json::Value = serde_json::from_str(&args[values_pos + 1]).unwrap();
        assert_eq!(values[":pkey"]["S"], "s1");
    }

    #[test]
    fn category_query_targets_calendars() {
        let args = store().category_args("category#007385");
        assert!(args.windows(2).any(|w| w[0] == "--table-name" && w[1] == "SurveyCalendars"));
        assert!(!args.iter().any(|a| a == "--index-name"));
        assert!(args.iter().any(|a| a.contains("category#007385")));
    }

    #[test]
    fn scan_targets_results() {
        let args = store().scan_args();
        assert_eq!(args, vec!["dynamodb", "scan", "--table-name", "SurveyResults", "--profile", "dev"]);
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let store = store().with_program("/nonexistent/slotaudit-aws");
        let result = store.fetch_summary_counts("cal-1").await;
        assert!(matches!(result, Err(GatewayError::SourceUnavailable(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_program_is_unavailable() {
        let store = store().with_program("false");
        let result = store.resolve_resource_key("category#007385").await;
        assert!(matches!(result, Err(GatewayError::SourceUnavailable(_))));
    }

    #[test]
    fn decode_utf8_output() {
        let text = decode_output("{\"check\": \"キャンセル\"}".as_bytes().to_vec()).unwrap();
        assert!(text.contains("キャンセル"));
    }

    #[test]
    fn decode_cp932_output() {
        let (bytes, _, unmappable) = encoding_rs::SHIFT_JIS.encode("取り消し");
        assert!(!unmappable);
        assert!(std::str::from_utf8(&bytes).is_err());
        assert_eq!(decode_output(bytes.into_owned()).unwrap(), "取り消し");
    }

    #[test]
    fn decode_garbage_is_malformed() {
        let result = decode_output(vec![b'{', 0x81]);
        assert!(matches!(result, Err(GatewayError::MalformedResponse(_))));
    }

    // `sh -c` consumes the aws arguments as positional parameters.
    #[cfg(unix)]
    fn scripted(output: &str) -> AwsCliStore {
        store().with_command("sh", ["-c", format!("printf '{output}'").as_str(), "aws"])
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ledger_rows_without_partition_key_are_counted_malformed() {
        let store = scripted(
            r#"{"Items": [{"partitionKey": {"S": "s1#0001"}, "check": {"S": "ok"}}, {"value": {"S": "category#007385_0|20210522|1"}}]}"#,
        );
        let partition = store.fetch_ledger_partition("s1").await.unwrap();
        assert_eq!(partition.records.len(), 1);
        assert_eq!(partition.records[0].group_key, "s1#0001");
        assert_eq!(partition.malformed, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cp932_ledger_status_survives() {
        // キャンセル in cp932, as printed by a Japanese Windows console.
        let store = scripted(
            r#"{"Items": [{"partitionKey": {"S": "s1#0001"}, "check": {"S": "\203L\203\203\203\223\203Z\203\213"}}]}"#,
        );
        let partition = store.fetch_ledger_partition("s1").await.unwrap();
        assert_eq!(partition.malformed, 0);
        assert_eq!(partition.records[0].status.as_deref(), Some("キャンセル"));
    }
}
