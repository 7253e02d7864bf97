//! Request serialisation, response parsing, escaping, and typed field
//! decoding (C2). See spec.md §4.2.

use std::collections::HashMap;

use crate::error::ProtoError;
use crate::masks::{
    analyze_bitmask, assemble_bitmask, mask_to_hex, FieldCategory, FieldDescriptor, FieldType,
};

/// The natural key identifying a file on the wire: either the stable
/// content hash/size pair, or the server-assigned file id once known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileIdentityQuery {
    ContentKey { ed2k: String, size: u64 },
    ServerKey { fid: u32 },
}

/// A `FILE` query: an identity plus the fields to request, spanning the
/// fmask and file-amask categories.
#[derive(Debug, Clone, PartialEq)]
pub struct FileQuery {
    pub identity: FileIdentityQuery,
    pub fields: Vec<&'static FieldDescriptor>,
    pub session: Option<String>,
    /// If true, a short response body decodes the fields it has rather
    /// than failing (spec.md's `ProtocolTruncation` tolerance).
    pub tolerate_truncation: bool,
}

/// An `ANIMEDESC` query: anime id plus part index, paginated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimeDescQuery {
    pub aid: u32,
    pub cur_part: u32,
    /// Known once the first response has been seen; zero until then.
    pub max_parts: u32,
    pub session: Option<String>,
}

/// A `MYLISTADD` query: registers a file by content key in the caller's
/// mylist. `edit` resends an existing entry with updated `viewed`/`state`
/// (a supplement over the distilled spec, grounded in the source's
/// `mylist add --edit` option).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MylistAddQuery {
    pub ed2k: String,
    pub size: u64,
    pub viewed: bool,
    pub state: u8,
    pub edit: bool,
    pub session: Option<String>,
}

/// Sealed request shape, replacing the source's runtime duck-typing
/// (spec.md §9).
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    File(FileQuery),
    AnimeDesc(AnimeDescQuery),
    MylistAdd(MylistAddQuery),
}

/// Behaviour every query shape must provide.
pub trait Query {
    /// Whether a response code is an acceptable reply to this query.
    fn validate_code(&self, code: u16) -> bool;
    /// Renders the query as the ASCII line sent on the wire.
    fn serialise(&self) -> String;
}

impl Query for FileQuery {
    fn validate_code(&self, code: u16) -> bool {
        matches!(code, 220 | 320)
    }

    fn serialise(&self) -> String {
        let fmask_fields: Vec<&'static FieldDescriptor> = self
            .fields
            .iter()
            .copied()
            .filter(|f| f.category == FieldCategory::FileFmask)
            .collect();
        let amask_fields: Vec<&'static FieldDescriptor> = self
            .fields
            .iter()
            .copied()
            .filter(|f| f.category == FieldCategory::FileAmask)
            .collect();
        let fmask = mask_to_hex(&assemble_bitmask(FieldCategory::FileFmask, &fmask_fields));
        let amask = mask_to_hex(&assemble_bitmask(FieldCategory::FileAmask, &amask_fields));

        let identity = match &self.identity {
            FileIdentityQuery::ContentKey { ed2k, size } => format!("size={size}&ed2k={ed2k}"),
            FileIdentityQuery::ServerKey { fid } => format!("fid={fid}"),
        };

        let mut line = format!("FILE {identity}&fmask={fmask}&amask={amask}");
        if let Some(s) = &self.session {
            line.push_str(&format!("&s={s}"));
        }
        line
    }
}

impl Query for AnimeDescQuery {
    fn validate_code(&self, code: u16) -> bool {
        code == 233
    }

    fn serialise(&self) -> String {
        let mut line = format!("ANIMEDESC aid={}&part={}", self.aid, self.cur_part);
        if let Some(s) = &self.session {
            line.push_str(&format!("&s={s}"));
        }
        line
    }
}

impl Query for MylistAddQuery {
    fn validate_code(&self, code: u16) -> bool {
        matches!(code, 210 | 310 | 311)
    }

    fn serialise(&self) -> String {
        let mut line = format!(
            "MYLISTADD size={}&ed2k={}&viewed={}&state={}",
            self.size,
            self.ed2k,
            self.viewed as u8,
            self.state
        );
        if self.edit {
            line.push_str("&edit=1");
        }
        if let Some(s) = &self.session {
            line.push_str(&format!("&s={s}"));
        }
        line
    }
}

impl AnimeDescQuery {
    /// The next page to request, or `None` once the last part has been
    /// fetched. Per spec.md §9, the correct comparison is `cur_part + 1 <
    /// max_parts` (the source's `cur_part < cur_part` was a bug).
    pub fn next_request(&self) -> Option<AnimeDescQuery> {
        if self.cur_part + 1 < self.max_parts {
            Some(AnimeDescQuery {
                aid: self.aid,
                cur_part: self.cur_part + 1,
                max_parts: self.max_parts,
                session: self.session.clone(),
            })
        } else {
            None
        }
    }
}

impl Query for Request {
    fn validate_code(&self, code: u16) -> bool {
        match self {
            Request::File(q) => q.validate_code(code),
            Request::AnimeDesc(q) => q.validate_code(code),
            Request::MylistAdd(q) => q.validate_code(code),
        }
    }

    fn serialise(&self) -> String {
        match self {
            Request::File(q) => q.serialise(),
            Request::AnimeDesc(q) => q.serialise(),
            Request::MylistAdd(q) => q.serialise(),
        }
    }
}

/// Parses a serialised request line back into a [`Request`]. Primarily
/// exists to exercise the round-trip invariant in tests; the engine itself
/// only ever serialises.
pub fn parse_request(line: &str) -> Result<Request, ProtoError> {
    let mut parts = line.splitn(2, ' ');
    let cmd = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default();

    let mut kv: HashMap<&str, &str> = HashMap::new();
    for pair in rest.split('&').filter(|p| !p.is_empty()) {
        let mut kv_parts = pair.splitn(2, '=');
        let key = kv_parts.next().unwrap_or_default();
        let value = kv_parts.next().unwrap_or_default();
        kv.insert(key, value);
    }

    match cmd {
        "FILE" => {
            let identity = if let (Some(size), Some(ed2k)) = (kv.get("size"), kv.get("ed2k")) {
                FileIdentityQuery::ContentKey {
                    ed2k: (*ed2k).to_string(),
                    size: size.parse().map_err(|_| ProtoError::Malformed(line.to_string()))?,
                }
            } else if let Some(fid) = kv.get("fid") {
                FileIdentityQuery::ServerKey {
                    fid: fid.parse().map_err(|_| ProtoError::Malformed(line.to_string()))?,
                }
            } else {
                return Err(ProtoError::Malformed(line.to_string()));
            };

            let fmask_bytes = hex::decode(kv.get("fmask").copied().unwrap_or("0000000000"))
                .map_err(|_| ProtoError::Malformed(line.to_string()))?;
            let amask_bytes = hex::decode(kv.get("amask").copied().unwrap_or("00000000"))
                .map_err(|_| ProtoError::Malformed(line.to_string()))?;

            let mut fields = analyze_bitmask(FieldCategory::FileFmask, &fmask_bytes);
            fields.extend(analyze_bitmask(FieldCategory::FileAmask, &amask_bytes));

            Ok(Request::File(FileQuery {
                identity,
                fields,
                session: kv.get("s").map(|s| s.to_string()),
                tolerate_truncation: false,
            }))
        }
        "ANIMEDESC" => {
            let aid = kv
                .get("aid")
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| ProtoError::Malformed(line.to_string()))?;
            let cur_part = kv.get("part").and_then(|s| s.parse().ok()).unwrap_or(0);
            Ok(Request::AnimeDesc(AnimeDescQuery {
                aid,
                cur_part,
                max_parts: 0,
                session: kv.get("s").map(|s| s.to_string()),
            }))
        }
        "MYLISTADD" => {
            let size = kv
                .get("size")
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| ProtoError::Malformed(line.to_string()))?;
            let ed2k = kv
                .get("ed2k")
                .map(|s| s.to_string())
                .ok_or_else(|| ProtoError::Malformed(line.to_string()))?;
            let viewed = kv.get("viewed").copied().unwrap_or("0") == "1";
            let state = kv.get("state").and_then(|s| s.parse().ok()).unwrap_or(0);
            let edit = kv.get("edit").copied().unwrap_or("0") == "1";
            Ok(Request::MylistAdd(MylistAddQuery {
                ed2k,
                size,
                viewed,
                state,
                edit,
                session: kv.get("s").map(|s| s.to_string()),
            }))
        }
        _ => Err(ProtoError::Malformed(line.to_string())),
    }
}

/// A parsed, not-yet-decoded response: `<code> <tag>` plus an optional body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub code: u16,
    pub tag: String,
    pub body: Option<String>,
}

/// Parses the `<code> <tag>\n<body>` envelope. Does not touch escaping or
/// field decoding — that happens per-column in [`decode_file_body`].
pub fn parse_raw_response(datagram: &str) -> Result<RawResponse, ProtoError> {
    let mut lines = datagram.splitn(2, '\n');
    let first = lines
        .next()
        .ok_or_else(|| ProtoError::Malformed(datagram.to_string()))?;
    let mut head = first.splitn(2, ' ');
    let code: u16 = head
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ProtoError::Malformed(first.to_string()))?;
    let tag = head.next().unwrap_or_default().trim_end_matches('\r').to_string();
    let body = lines.next().map(|s| s.trim_end_matches('\r').to_string());
    Ok(RawResponse { code, tag, body })
}

/// Reverses the server's column escaping, in the documented order:
/// `'` → `§`, `<br />` → newline, `/` → `|` (unless `preserve_slashes`,
/// used for column 2 of an `ANIMEDESC` body), then `` ` `` → `'`.
pub fn unescape_column(raw: &str, preserve_slashes: bool) -> String {
    let mut s = raw.replace('\'', "§");
    s = s.replace("<br />", "\n");
    if !preserve_slashes {
        s = s.replace('/', "|");
    }
    s.replace('`', "'")
}

/// Inverse of [`unescape_column`] — applies the same substitutions in
/// reverse order. Used by tests to check the escape round trip (invariant
/// 4) and by anything that needs to synthesise a server-shaped response.
pub fn escape_column(value: &str, preserve_slashes: bool) -> String {
    let mut s = value.replace('\'', "`");
    if !preserve_slashes {
        s = s.replace('|', "/");
    }
    s = s.replace('\n', "<br />");
    s.replace('§', "'")
}

/// A field's value, deserialised according to its declared semantic type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(Option<i64>),
    Str(String),
    Timestamp(Option<i64>),
    ListStr(Vec<String>),
    ListInt(Vec<i64>),
    Opaque(String),
}

pub fn decode_field_value(ty: FieldType, raw: &str) -> FieldValue {
    match ty {
        FieldType::Integer => FieldValue::Int(parse_or_none(raw)),
        FieldType::Str => FieldValue::Str(raw.to_string()),
        FieldType::Timestamp => FieldValue::Timestamp(parse_or_none(raw)),
        FieldType::ListStr => FieldValue::ListStr(parse_list(raw)),
        FieldType::ListInt => {
            FieldValue::ListInt(if raw == "none" {
                Vec::new()
            } else {
                raw.split('§').filter_map(|s| s.parse().ok()).collect()
            })
        }
        FieldType::Opaque => FieldValue::Opaque(raw.to_string()),
    }
}

fn parse_or_none(raw: &str) -> Option<i64> {
    if raw == "none" {
        None
    } else {
        raw.parse().ok()
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    if raw == "none" {
        Vec::new()
    } else {
        raw.split('§').map(|s| s.to_string()).collect()
    }
}

/// A decoded `FILE` response: the implicit `fid` plus every field the
/// server actually returned a column for (see truncation tolerance below).
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFile {
    pub fid: u32,
    pub values: Vec<(&'static str, FieldValue)>,
}

impl DecodedFile {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }
}

/// Decodes a `FILE` response body. `fields` must already be in the
/// server's serialisation order (fmask fields MSB→LSB, then amask fields
/// MSB→LSB — see [`crate::masks::sort_fields`]).
pub fn decode_file_body(
    body: &str,
    fields: &[&'static FieldDescriptor],
    tolerate_truncation: bool,
) -> Result<DecodedFile, ProtoError> {
    let columns: Vec<String> = body.split('|').map(|c| unescape_column(c, false)).collect();
    let expected = 1 + fields.len();

    if columns.len() < expected && !tolerate_truncation {
        return Err(ProtoError::Truncated {
            expected,
            got: columns.len(),
        });
    }
    if columns.is_empty() {
        return Err(ProtoError::Malformed(body.to_string()));
    }

    let fid: u32 = columns[0]
        .parse()
        .map_err(|_| ProtoError::Malformed(columns[0].clone()))?;

    let mut values = Vec::with_capacity(fields.len());
    for (i, f) in fields.iter().enumerate() {
        match columns.get(i + 1) {
            Some(col) => values.push((f.name, decode_field_value(f.ty, col))),
            None => break,
        }
    }

    Ok(DecodedFile { fid, values })
}

/// A decoded `ANIMEDESC` response: the pagination counters plus the raw
/// bbcode body text for this part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimeDescBody {
    pub cur_part: u32,
    pub max_parts: u32,
    pub content: String,
}

/// Decodes an `ANIMEDESC` response body. Column 2 (the bbcode content) is
/// unescaped with slashes preserved, per spec.md §4.2's quirk — the other
/// two columns go through the ordinary column unescape.
pub fn decode_animedesc_body(body: &str) -> Result<AnimeDescBody, ProtoError> {
    let raw_columns: Vec<&str> = body.split('|').collect();
    if raw_columns.len() < 3 {
        return Err(ProtoError::Truncated { expected: 3, got: raw_columns.len() });
    }
    let cur_part: u32 = unescape_column(raw_columns[0], false)
        .parse()
        .map_err(|_| ProtoError::Malformed(raw_columns[0].to_string()))?;
    let max_parts: u32 = unescape_column(raw_columns[1], false)
        .parse()
        .map_err(|_| ProtoError::Malformed(raw_columns[1].to_string()))?;
    let content = unescape_column(raw_columns[2], true);
    Ok(AnimeDescBody { cur_part, max_parts, content })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::{field_by_name, sort_fields};

    fn canonical_fields(names: &[&str]) -> Vec<&'static FieldDescriptor> {
        sort_fields(names.iter().map(|n| field_by_name(n).unwrap()).collect())
    }

    #[test]
    fn s4_response_decode() {
        // spec.md S4: 220 FILE\n123|456|a1b2…\n, query {aid, ed2k}.
        let raw = parse_raw_response("220 FILE\n123|456|a1b2\n").unwrap();
        assert_eq!(raw.code, 220);
        let fields = canonical_fields(&["aid", "ed2k"]);
        let decoded = decode_file_body(&raw.body.unwrap(), &fields, false).unwrap();
        assert_eq!(decoded.fid, 123);
        assert_eq!(decoded.get("aid"), Some(&FieldValue::Int(Some(456))));
        assert_eq!(decoded.get("ed2k"), Some(&FieldValue::Str("a1b2".into())));
    }

    #[test]
    fn truncated_body_tolerated_when_opted_in() {
        let fields = canonical_fields(&["aid", "ed2k", "size"]);
        let decoded = decode_file_body("123|456", &fields, true).unwrap();
        assert_eq!(decoded.fid, 123);
        assert_eq!(decoded.get("aid"), Some(&FieldValue::Int(Some(456))));
        assert_eq!(decoded.get("ed2k"), None);
    }

    #[test]
    fn truncated_body_rejected_by_default() {
        let fields = canonical_fields(&["aid", "ed2k", "size"]);
        let err = decode_file_body("123|456", &fields, false).unwrap_err();
        assert!(matches!(err, ProtoError::Truncated { .. }));
    }

    #[test]
    fn integer_field_none_literal_is_null() {
        assert_eq!(decode_field_value(FieldType::Integer, "none"), FieldValue::Int(None));
        assert_eq!(decode_field_value(FieldType::Integer, "42"), FieldValue::Int(Some(42)));
    }

    #[test]
    fn list_field_splits_on_section_marker() {
        assert_eq!(
            decode_field_value(FieldType::ListStr, "a§b§c"),
            FieldValue::ListStr(vec!["a".into(), "b".into(), "c".into()])
        );
        assert_eq!(decode_field_value(FieldType::ListStr, "none"), FieldValue::ListStr(vec![]));
    }

    #[test]
    fn request_round_trip_content_key() {
        let fields = canonical_fields(&["aid", "ed2k", "size"]);
        let req = Request::File(FileQuery {
            identity: FileIdentityQuery::ContentKey {
                ed2k: "a".repeat(32),
                size: 12345,
            },
            fields,
            session: Some("tok".into()),
            tolerate_truncation: false,
        });
        let parsed = parse_request(&req.serialise()).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn request_round_trip_server_key() {
        let fields = canonical_fields(&["quality"]);
        let req = Request::File(FileQuery {
            identity: FileIdentityQuery::ServerKey { fid: 99 },
            fields,
            session: None,
            tolerate_truncation: false,
        });
        let parsed = parse_request(&req.serialise()).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn mylistadd_round_trip() {
        let req = Request::MylistAdd(MylistAddQuery {
            ed2k: "a".repeat(32),
            size: 54321,
            viewed: true,
            state: 2,
            edit: false,
            session: Some("tok".into()),
        });
        let parsed = parse_request(&req.serialise()).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn mylistadd_validates_210_310_311_only() {
        let q = MylistAddQuery {
            ed2k: "a".repeat(32),
            size: 1,
            viewed: false,
            state: 0,
            edit: false,
            session: None,
        };
        assert!(q.validate_code(210));
        assert!(q.validate_code(310));
        assert!(q.validate_code(311));
        assert!(!q.validate_code(220));
    }

    #[test]
    fn animedesc_next_request_uses_cur_part_plus_one() {
        let q = AnimeDescQuery {
            aid: 1,
            cur_part: 0,
            max_parts: 2,
            session: None,
        };
        let next = q.next_request().unwrap();
        assert_eq!(next.cur_part, 1);
        assert!(next.next_request().is_none());
    }

    #[test]
    fn animedesc_body_preserves_slashes_in_content_column() {
        let decoded = decode_animedesc_body("0|1|[spoiler]1/2 chance[/spoiler]").unwrap();
        assert_eq!(decoded.cur_part, 0);
        assert_eq!(decoded.max_parts, 1);
        assert_eq!(decoded.content, "[spoiler]1/2 chance[/spoiler]");
    }

    #[test]
    fn animedesc_body_rejects_missing_columns() {
        let err = decode_animedesc_body("0|1").unwrap_err();
        assert!(matches!(err, ProtoError::Truncated { .. }));
    }

    proptest::proptest! {
        #[test]
        fn prop_escape_round_trip(s in "[a-zA-Z0-9 ]{0,40}") {
            // Strings with none of the sentinel characters round-trip
            // trivially through both directions.
            prop_assert_eq!(unescape_column(&escape_column(&s, false), false), s.clone());
            prop_assert_eq!(escape_column(&unescape_column(&s, false), false), s);
        }
    }
}
