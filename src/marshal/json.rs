//! JSON vault format (format 2).
//!
//! Carries everything the flat format does, plus security questions and
//! URLs. Sites are read one by one so a bad entry is reported on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Content, Document, Entry, VaultFormat, VaultHeader};
use crate::algorithm::Algorithm;
use crate::error::{MalformedRecord, MpwError};
use crate::identicon::Identicon;
use crate::keys::KeyId;
use crate::session::UserProfile;
use crate::site::{Question, SiteRecord};
use crate::template::ResultType;

#[derive(Serialize, Deserialize)]
struct JsonDocument<S> {
    export: JsonExport,
    user: JsonUser,
    #[serde(default)]
    sites: Vec<S>,
}

#[derive(Serialize, Deserialize)]
struct JsonExport {
    format: u32,
    date: DateTime<Utc>,
    redacted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

fn default_password_type() -> ResultType {
    ResultType::DEFAULT_PASSWORD
}

fn default_login_type() -> ResultType {
    ResultType::DEFAULT_LOGIN
}

fn default_answer_type() -> ResultType {
    ResultType::DEFAULT_ANSWER
}

#[derive(Serialize, Deserialize)]
struct JsonUser {
    full_name: String,
    #[serde(default)]
    avatar: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identicon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_id: Option<KeyId>,
    /// Read as a number so an unknown version is reported as such.
    algorithm: u32,
    #[serde(default = "default_password_type")]
    default_type: ResultType,
    #[serde(default = "default_login_type")]
    login_type: ResultType,
    #[serde(default)]
    last_used: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize)]
struct JsonSite {
    name: String,
    #[serde(rename = "type")]
    result_type: ResultType,
    counter: u32,
    algorithm: Algorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    login_name: Option<String>,
    /// Absent in older exports; the user's login type applies.
    #[serde(default)]
    login_type: Option<ResultType>,
    #[serde(default)]
    uses: u32,
    last_used: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    questions: Vec<JsonQuestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct JsonQuestion {
    keyword: String,
    #[serde(rename = "type", default = "default_answer_type")]
    result_type: ResultType,
}

pub(super) fn write(header: &VaultHeader, entries: &[Entry]) -> Result<String, MpwError> {
    let profile = &header.profile;
    let document = JsonDocument {
        export: JsonExport {
            format: VaultFormat::Json.number(),
            date: header.date,
            redacted: header.redacted,
            checksum: header.checksum.clone(),
        },
        user: JsonUser {
            full_name: profile.full_name.clone(),
            avatar: profile.avatar,
            identicon: profile.identicon.map(|identicon| identicon.to_string()),
            key_id: profile.key_id,
            algorithm: profile.algorithm.number(),
            default_type: profile.default_type,
            login_type: profile.login_type,
            last_used: Some(profile.last_used),
        },
        sites: entries
            .iter()
            .map(|entry| {
                let record = &entry.record;
                JsonSite {
                    name: record.name.clone(),
                    result_type: record.result_type,
                    counter: record.counter,
                    algorithm: record.algorithm,
                    login_name: record.login_name.clone().filter(|login| !login.is_empty()),
                    login_type: Some(record.login_type),
                    uses: record.uses,
                    last_used: record.last_used,
                    content: entry.content.encode().map(|text| text.as_str().to_owned()),
                    questions: record
                        .questions
                        .iter()
                        .map(|question| JsonQuestion {
                            keyword: question.keyword.clone(),
                            result_type: question.result_type,
                        })
                        .collect(),
                    url: record.url.clone(),
                }
            })
            .collect(),
    };

    let mut text = serde_json::to_string_pretty(&document)
        .map_err(|_| MpwError::InvalidParameter("vault could not be serialized".into()))?;
    text.push('\n');
    Ok(text)
}

pub(super) fn parse(text: &str) -> Result<Document, MpwError> {
    let root: Value = serde_json::from_str(text)
        .map_err(|e| MpwError::MalformedHeader(format!("invalid JSON: {}", e)))?;

    let format = root
        .pointer("/export/format")
        .and_then(Value::as_u64)
        .ok_or_else(|| MpwError::MalformedHeader("missing export format".into()))?;
    if format != u64::from(VaultFormat::Json.number()) {
        return Err(MpwError::UnsupportedFormat(format.to_string()));
    }

    let document: JsonDocument<Value> =
        serde_json::from_value(root).map_err(|e| MpwError::MalformedHeader(e.to_string()))?;
    let JsonDocument {
        export,
        user,
        sites,
    } = document;
    if user.full_name.is_empty() {
        return Err(MpwError::MalformedHeader("missing full name".into()));
    }

    let header = VaultHeader {
        format: VaultFormat::Json,
        date: export.date,
        redacted: export.redacted,
        profile: UserProfile {
            full_name: user.full_name,
            avatar: user.avatar,
            identicon: user.identicon.and_then(|value| value.parse::<Identicon>().ok()),
            key_id: user.key_id,
            algorithm: Algorithm::try_from(user.algorithm)?,
            default_type: user.default_type,
            login_type: user.login_type,
            last_used: user.last_used.unwrap_or(export.date),
        },
        checksum: export.checksum.filter(|checksum| !checksum.is_empty()),
    };

    let mut entries = Vec::with_capacity(sites.len());
    let mut malformed = Vec::new();
    for (index, value) in sites.into_iter().enumerate() {
        match parse_site(index + 1, value, &header) {
            Ok(entry) => entries.push(entry),
            Err(record) => malformed.push(record),
        }
    }

    Ok(Document {
        header,
        entries,
        malformed,
    })
}

fn parse_site(line: usize, value: Value, header: &VaultHeader) -> Result<Entry, MalformedRecord> {
    // serde messages may quote field values; keep them out of the report.
    let site: JsonSite =
        serde_json::from_value(value).map_err(|_| MalformedRecord::new(line, "invalid site entry"))?;

    let content = Content::decode(site.result_type, header.redacted, site.content.as_deref())
        .map_err(|reason| MalformedRecord::new(line, reason))?;

    let record = SiteRecord {
        name: site.name,
        result_type: site.result_type,
        counter: site.counter,
        algorithm: site.algorithm,
        login_name: site.login_name.filter(|login| !login.is_empty()),
        login_type: site.login_type.unwrap_or(header.profile.login_type),
        uses: site.uses,
        last_used: site.last_used,
        encrypted_content: None,
        questions: site
            .questions
            .into_iter()
            .map(|question| Question {
                keyword: question.keyword,
                result_type: question.result_type,
            })
            .collect(),
        url: site.url,
    };
    Entry::checked(line, record, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault(sites: &str) -> String {
        format!(
            r#"{{
                "export": {{ "format": 2, "date": "2024-05-01T10:00:00Z", "redacted": true }},
                "user": {{ "full_name": "Robert Lee Mitchell", "algorithm": 3 }},
                "sites": [{}]
            }}"#,
            sites
        )
    }

    #[test]
    fn test_parse_sites_individually() {
        let text = vault(
            r#"
            { "name": "example.com", "type": 17, "counter": 1, "algorithm": 3,
              "last_used": "2024-05-01T10:00:00Z",
              "questions": [ { "keyword": "mother" } ], "url": "https://example.com" },
            { "name": "broken", "type": "long" },
            { "name": "bank", "type": 1056, "counter": 1, "algorithm": 3,
              "last_used": "2024-05-01T10:00:00Z", "content": "%%%" }
            "#,
        );
        let document = parse(&text).unwrap();
        assert_eq!(document.entries.len(), 1);
        let lines: Vec<_> = document.malformed.iter().map(|record| record.line).collect();
        assert_eq!(lines, [2, 3]);

        let record = &document.entries[0].record;
        assert_eq!(record.questions, vec![Question::new("mother")]);
        assert_eq!(record.url.as_deref(), Some("https://example.com"));
        assert_eq!(document.header.profile.last_used, document.header.date);
    }

    #[test]
    fn test_header_errors() {
        assert!(matches!(parse("{ not json"), Err(MpwError::MalformedHeader(_))));
        assert!(matches!(
            parse(&vault("").replace("\"format\": 2", "\"format\": 3")),
            Err(MpwError::UnsupportedFormat(_))
        ));
        assert_eq!(
            parse(&vault("").replace("\"algorithm\": 3", "\"algorithm\": 8")).err(),
            Some(MpwError::UnsupportedAlgorithm(8))
        );
    }

    #[test]
    fn test_write_then_parse_keeps_questions() {
        let mut record = SiteRecord::new("example.com", ResultType::Long, Algorithm::V3).unwrap();
        record.questions.push(Question {
            keyword: "pin".into(),
            result_type: ResultType::Pin,
        });
        record.url = Some("https://example.com/login".into());
        let header = parse(&vault("")).unwrap().header;

        let text = write(
            &header,
            &[Entry {
                line: 1,
                record: record.clone(),
                content: Content::Empty,
            }],
        )
        .unwrap();
        let parsed = parse(&text).unwrap();
        assert_eq!(parsed.header, header);
        assert_eq!(parsed.entries[0].record, record);
    }
}
