//! Flat vault format (format 1).
//!
//! ```text
//! # Master Password site export
//! ##
//! # Format: 1
//! # User Name: Robert Lee Mitchell
//! # ...
//! ##
//! 2024-05-01T10:00:00Z         3      17:3:1  robert\texample.com\t
//! ```
//!
//! Each site line is `date  uses  type:algorithm:counter  login<TAB>name<TAB>content`.
//! Text columns are backslash-escaped so they never contain tabs or line
//! breaks. Lines starting with `#` outside the header are comments.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use chrono::{DateTime, SecondsFormat, Utc};

use super::{Content, Document, Entry, VaultFormat, VaultHeader};
use crate::algorithm::Algorithm;
use crate::codec;
use crate::error::{MalformedRecord, MpwError};
use crate::identicon::Identicon;
use crate::keys::KeyId;
use crate::session::UserProfile;
use crate::site::SiteRecord;
use crate::template::ResultType;

const FENCE: &str = "##";

fn timestamp(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_date(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|date| date.with_timezone(&Utc))
}

fn parse_number<T: TryFrom<u32, Error = MpwError>>(text: &str) -> Result<T, MpwError> {
    let number = text
        .parse::<u32>()
        .map_err(|_| MpwError::InvalidParameter("not a number".into()))?;
    T::try_from(number)
}

fn header_field(out: &mut String, key: &str, value: impl fmt::Display) {
    let _ = writeln!(out, "# {}: {}", key, value);
}

/// Readers trim column padding, so text columns must not start or end with a
/// space.
pub(super) fn check(record: &SiteRecord) -> Result<(), MpwError> {
    let padded = |text: &str| text.starts_with(' ') || text.ends_with(' ');
    if padded(&record.name) || record.login_name.as_deref().is_some_and(padded) {
        return Err(MpwError::InvalidParameter(
            "flat vaults cannot hold names with surrounding spaces".into(),
        ));
    }
    Ok(())
}

pub(super) fn write(header: &VaultHeader, entries: &[Entry]) -> String {
    let profile = &header.profile;
    let mut out = String::with_capacity(1024 + entries.len() * 96);

    out.push_str("# Master Password site export\n");
    if header.redacted {
        out.push_str("#     Site names and stored passwords (unless device-private), encrypted with the master key.\n");
    } else {
        out.push_str("#     Site names and passwords in clear text.\n");
    }
    out.push_str("#\n");
    out.push_str(FENCE);
    out.push('\n');
    header_field(&mut out, "Format", VaultFormat::Flat.number());
    header_field(&mut out, "Date", timestamp(&header.date));
    header_field(&mut out, "User Name", codec::escape_field(&profile.full_name));
    header_field(&mut out, "Avatar", profile.avatar);
    header_field(
        &mut out,
        "Identicon",
        profile.identicon.map(|identicon| identicon.to_string()).unwrap_or_default(),
    );
    header_field(
        &mut out,
        "Key ID",
        profile.key_id.map(|id| id.to_string()).unwrap_or_default(),
    );
    header_field(&mut out, "Algorithm", profile.algorithm.number());
    header_field(&mut out, "Default Type", profile.default_type.number());
    header_field(&mut out, "Login Type", profile.login_type.number());
    header_field(&mut out, "Last Used", timestamp(&profile.last_used));
    header_field(
        &mut out,
        "Passwords",
        if header.redacted { "PROTECTED" } else { "VISIBLE" },
    );
    header_field(&mut out, "Checksum", header.checksum.as_deref().unwrap_or_default());
    out.push_str(FENCE);
    out.push_str("\n#\n");
    out.push_str("#               Last     Times  Password                      Login\t                     Site\tSite\n");
    out.push_str("#               used      used      type                       name\t                     name\tpassword\n");

    for entry in entries {
        let record = &entry.record;
        let content = entry.content.encode();
        let _ = writeln!(
            out,
            "{}  {:>8}  {:>10}  {}\t{}\t{}",
            timestamp(&record.last_used),
            record.uses,
            format!(
                "{}:{}:{}",
                record.result_type.number(),
                record.algorithm.number(),
                record.counter
            ),
            codec::escape_field(record.login_name.as_deref().unwrap_or_default()),
            codec::escape_field(&record.name),
            content
                .as_deref()
                .map(|text| codec::escape_field(text))
                .unwrap_or_default(),
        );
    }
    out
}

pub(super) fn parse(text: &str) -> Result<Document, MpwError> {
    let mut lines = text.lines().enumerate().map(|(index, line)| (index + 1, line));

    let mut fields = BTreeMap::new();
    let mut opened = false;
    let mut closed = false;
    for (_, line) in lines.by_ref() {
        if line.starts_with(FENCE) {
            if opened {
                closed = true;
                break;
            }
            opened = true;
            continue;
        }
        if !line.starts_with('#') {
            if line.trim().is_empty() {
                continue;
            }
            return Err(MpwError::MalformedHeader("site line before the header".into()));
        }
        if !opened {
            continue;
        }
        if let Some((key, value)) = line[1..].split_once(':') {
            let value = value.strip_prefix(' ').unwrap_or(value);
            fields.insert(key.trim().to_owned(), value.to_owned());
        }
    }
    if !closed {
        return Err(MpwError::MalformedHeader("header is not terminated".into()));
    }
    let header = parse_header(&fields)?;

    let mut entries = Vec::new();
    let mut malformed = Vec::new();
    for (number, line) in lines {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_line(number, line, &header) {
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

fn parse_header(fields: &BTreeMap<String, String>) -> Result<VaultHeader, MpwError> {
    let get = |key: &str| fields.get(key).map(String::as_str).filter(|value| !value.is_empty());
    let require = |key: &str| get(key).ok_or_else(|| MpwError::MalformedHeader(format!("missing {}", key)));
    let invalid = |key: &str| MpwError::MalformedHeader(format!("invalid {}", key));

    let format = require("Format")?;
    if format != VaultFormat::Flat.number().to_string() {
        return Err(MpwError::UnsupportedFormat(format.to_owned()));
    }
    let date = parse_date(require("Date")?).map_err(|_| invalid("Date"))?;
    let full_name = codec::unescape_field(require("User Name")?)
        .map_err(|_| invalid("User Name"))?
        .into_owned();
    let algorithm = match parse_number::<Algorithm>(require("Algorithm")?) {
        Err(MpwError::UnsupportedAlgorithm(version)) => return Err(MpwError::UnsupportedAlgorithm(version)),
        other => other.map_err(|_| invalid("Algorithm"))?,
    };
    let redacted = match require("Passwords")? {
        "PROTECTED" => true,
        "VISIBLE" => false,
        _ => return Err(invalid("Passwords")),
    };

    let avatar = get("Avatar")
        .map(str::parse::<u32>)
        .transpose()
        .map_err(|_| invalid("Avatar"))?
        .unwrap_or(0);
    let key_id = get("Key ID")
        .map(str::parse::<KeyId>)
        .transpose()
        .map_err(|_| invalid("Key ID"))?;
    let default_type = get("Default Type")
        .map(parse_number::<ResultType>)
        .transpose()
        .map_err(|_| invalid("Default Type"))?
        .unwrap_or(ResultType::DEFAULT_PASSWORD);
    let login_type = get("Login Type")
        .map(parse_number::<ResultType>)
        .transpose()
        .map_err(|_| invalid("Login Type"))?
        .unwrap_or(ResultType::DEFAULT_LOGIN);
    let last_used = get("Last Used")
        .map(parse_date)
        .transpose()
        .map_err(|_| invalid("Last Used"))?
        .unwrap_or(date);

    Ok(VaultHeader {
        format: VaultFormat::Flat,
        date,
        redacted,
        profile: UserProfile {
            full_name,
            avatar,
            // Cosmetic; an unreadable identicon is recomputed at sign-in.
            identicon: get("Identicon").and_then(|value| value.parse::<Identicon>().ok()),
            key_id,
            algorithm,
            default_type,
            login_type,
            last_used,
        },
        checksum: get("Checksum").map(str::to_owned),
    })
}

/// Cut the next space-delimited token off the front of `rest`.
fn next_token<'a>(rest: &mut &'a str) -> Option<&'a str> {
    let trimmed = rest.trim_start_matches(' ');
    let end = trimmed.find(' ').unwrap_or(trimmed.len());
    let (token, tail) = trimmed.split_at(end);
    *rest = tail;
    (!token.is_empty()).then_some(token)
}

/// Parse one site line. The flat format has no per-site login type; sites
/// take the user's.
fn parse_line(number: usize, line: &str, header: &VaultHeader) -> Result<Entry, MalformedRecord> {
    let bad = |reason: &str| MalformedRecord::new(number, reason);

    let mut columns = line.splitn(3, '\t');
    let (Some(prefix), Some(name), Some(content)) = (columns.next(), columns.next(), columns.next())
    else {
        return Err(bad("expected three tab-separated columns"));
    };

    let mut rest = prefix;
    let date = next_token(&mut rest).ok_or_else(|| bad("missing date"))?;
    let uses = next_token(&mut rest).ok_or_else(|| bad("missing use count"))?;
    let kind = next_token(&mut rest).ok_or_else(|| bad("missing type"))?;
    let login = rest.strip_prefix("  ").ok_or_else(|| bad("missing login column"))?;

    let last_used = parse_date(date).map_err(|_| bad("invalid date"))?;
    let uses = uses.parse::<u32>().map_err(|_| bad("invalid use count"))?;

    let mut parts = kind.split(':');
    let (Some(result_type), Some(algorithm), Some(counter), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(bad("invalid type column"));
    };
    let result_type = parse_number::<ResultType>(result_type).map_err(|_| bad("unsupported result type"))?;
    let algorithm = parse_number::<Algorithm>(algorithm).map_err(|_| bad("unsupported algorithm"))?;
    let counter = counter.parse::<u32>().map_err(|_| bad("invalid counter"))?;

    // Text columns may be padded for alignment.
    let login = codec::unescape_field(login.trim_matches(' ')).map_err(|_| bad("invalid login name"))?;
    let name = codec::unescape_field(name.trim_matches(' ')).map_err(|_| bad("invalid site name"))?;
    let content = codec::unescape_field(content).map_err(|_| bad("invalid content"))?;
    // An empty column cannot tell empty content from none.
    let content = Content::decode(result_type, header.redacted, (!content.is_empty()).then_some(&*content))
        .map_err(bad)?;

    let record = SiteRecord {
        name: name.into_owned(),
        result_type,
        counter,
        algorithm,
        login_name: (!login.is_empty()).then(|| login.into_owned()),
        login_type: header.profile.login_type,
        uses,
        last_used,
        encrypted_content: None,
        questions: Vec::new(),
        url: None,
    };
    Entry::checked(number, record, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "# Master Password site export\n\
        ##\n\
        # Format: 1\n\
        # Date: 2024-05-01T10:00:00Z\n\
        # User Name: Robert Lee Mitchell\n\
        # Algorithm: 3\n\
        # Passwords: PROTECTED\n\
        ##\n";

    #[test]
    fn test_parse_minimal_header_uses_defaults() {
        let document = parse(HEADER).unwrap();
        let profile = &document.header.profile;
        assert_eq!(profile.full_name, "Robert Lee Mitchell");
        assert_eq!(profile.algorithm, Algorithm::V3);
        assert_eq!(profile.default_type, ResultType::Long);
        assert_eq!(profile.login_type, ResultType::Name);
        assert_eq!(profile.last_used, document.header.date);
        assert_eq!(profile.key_id, None);
        assert!(document.header.redacted);
        assert!(document.entries.is_empty());
    }

    #[test]
    fn test_parse_site_lines() {
        let text = format!(
            "{}# comment\n\n\
             2024-05-01T10:00:00Z         3      17:3:2  robert\texample.com\t\n\
             2024-05-02T10:00:00.5Z         0      20:1:1  \tshort.net\t\n",
            HEADER
        );
        let document = parse(&text).unwrap();
        assert!(document.malformed.is_empty());
        assert_eq!(document.entries.len(), 2);

        let first = &document.entries[0].record;
        assert_eq!(first.name, "example.com");
        assert_eq!(first.result_type, ResultType::Long);
        assert_eq!((first.counter, first.uses), (2, 3));
        assert_eq!(first.login_name.as_deref(), Some("robert"));

        let second = &document.entries[1].record;
        assert_eq!(second.algorithm, Algorithm::V1);
        assert_eq!(second.login_name, None);
        assert_eq!(second.last_used.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_aligned_columns_are_trimmed() {
        let text = format!(
            "{}2024-05-01T10:00:00Z         3      17:3:2                     robert\t              example.com\t\n",
            HEADER
        );
        let document = parse(&text).unwrap();
        let record = &document.entries[0].record;
        assert_eq!(record.name, "example.com");
        assert_eq!(record.login_name.as_deref(), Some("robert"));
        assert_eq!(record.login_type, ResultType::Name);
    }

    #[test]
    fn test_malformed_lines_are_collected() {
        let text = format!(
            "{}\
             not a site line\n\
             2024-05-01T10:00:00Z         3      99:3:1  \tbad-type\t\n\
             2024-05-01T10:00:00Z         3      17:3:0  \tzero\t\n\
             2024-05-01T10:00:00Z         3      17:3:1  \tgood\t\n",
            HEADER
        );
        let document = parse(&text).unwrap();
        assert_eq!(document.entries.len(), 1);
        let lines: Vec<_> = document.malformed.iter().map(|record| record.line).collect();
        assert_eq!(lines, [9, 10, 11]);
    }

    #[test]
    fn test_header_errors() {
        assert!(matches!(parse("# nothing here\n"), Err(MpwError::MalformedHeader(_))));
        assert!(matches!(
            parse(&HEADER.replace("Format: 1", "Format: 7")),
            Err(MpwError::UnsupportedFormat(_))
        ));
        assert_eq!(
            parse(&HEADER.replace("Algorithm: 3", "Algorithm: 9")).err(),
            Some(MpwError::UnsupportedAlgorithm(9))
        );
        assert!(matches!(
            parse(&HEADER.replace("# User Name: Robert Lee Mitchell\n", "")),
            Err(MpwError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_escaped_columns_survive() {
        let mut record = SiteRecord::new("tab\tname", ResultType::Long, Algorithm::V3).unwrap();
        record.login_name = Some("back\\slash".into());
        let header = parse(HEADER).unwrap().header;
        let text = write(
            &header,
            &[Entry {
                line: 1,
                record: record.clone(),
                content: Content::Empty,
            }],
        );

        let parsed = parse(&text).unwrap();
        assert_eq!(parsed.header, header);
        assert_eq!(parsed.entries[0].record, record);
    }
}
