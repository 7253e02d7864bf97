//! The four pipeline operations (spec.md §4.8): `hash`, `mylist-add`,
//! `get-file-info`, `rename`. Each advances (or fails) one record.

use std::sync::LazyLock;

use regex::Regex;

use anidb_cache::CacheStore;
use anidb_proto::{field_by_name, sort_fields, FieldValue, FileIdentityQuery, MylistAddQuery, Request};
use anidb_query::{FileAnswer, QueryPlanner};
use anidb_transport::Engine;

use crate::error::PipelineError;
use crate::record::{Record, RecordState};
use crate::rename::{format_aired, format_name, place_file, resolve_target, RenameConfig};

/// Borrowed access to everything but the record itself; threaded through
/// every operation so the runtime owns exactly one cache/engine pair.
pub struct OperationContext<'a> {
    pub cache: &'a mut CacheStore,
    pub engine: &'a mut Engine,
}

pub trait Operation {
    fn name(&self) -> &'static str;
    fn run(&mut self, record: &mut Record, ctx: &mut OperationContext) -> Result<(), PipelineError>;
}

/// Computes the ed2k content hash, populating `ed2k` and `size`.
pub struct HashOperation;

impl Operation for HashOperation {
    fn name(&self) -> &'static str {
        "hash"
    }

    fn run(&mut self, record: &mut Record, _ctx: &mut OperationContext) -> Result<(), PipelineError> {
        let hash = anidb_hash::hash_file(&record.path)?;
        record.set("ed2k", hash.ed2k);
        record.set("size", hash.size.to_string());
        record.state = RecordState::Hashed;
        Ok(())
    }
}

/// Adds the hashed file to the caller's mylist. Optional in the pipeline
/// and does not advance the high-level identification state.
pub struct MylistAddOperation {
    pub viewed: bool,
    pub state: u8,
    pub edit: bool,
}

impl Operation for MylistAddOperation {
    fn name(&self) -> &'static str {
        "mylist-add"
    }

    fn run(&mut self, record: &mut Record, ctx: &mut OperationContext) -> Result<(), PipelineError> {
        let ed2k = record
            .get("ed2k")
            .ok_or_else(|| PipelineError::MissingField("ed2k".into()))?
            .to_string();
        let size: u64 = record
            .get("size")
            .ok_or_else(|| PipelineError::MissingField("size".into()))?
            .parse()
            .map_err(|_| PipelineError::MissingField("size".into()))?;

        let mut req = Request::MylistAdd(MylistAddQuery {
            ed2k,
            size,
            viewed: self.viewed,
            state: self.state,
            edit: self.edit,
            session: None,
        });
        let raw = ctx.engine.call(&mut req)?;
        record.set("mylist_response_code", raw.code.to_string());
        Ok(())
    }
}

/// Resolves the file's identity and requested metadata fields via the
/// query planner, moving the record through `IDENTIFIED` to
/// `METADATA_READY`.
pub struct GetFileInfoOperation {
    pub field_names: Vec<&'static str>,
}

impl Operation for GetFileInfoOperation {
    fn name(&self) -> &'static str {
        "get-file-info"
    }

    fn run(&mut self, record: &mut Record, ctx: &mut OperationContext) -> Result<(), PipelineError> {
        let ed2k = record
            .get("ed2k")
            .ok_or_else(|| PipelineError::MissingField("ed2k".into()))?
            .to_string();
        let size: u64 = record
            .get("size")
            .ok_or_else(|| PipelineError::MissingField("size".into()))?
            .parse()
            .map_err(|_| PipelineError::MissingField("size".into()))?;

        let fields = sort_fields(
            self.field_names
                .iter()
                .filter_map(|name| field_by_name(name))
                .collect(),
        );

        let mut planner = QueryPlanner::new(ctx.cache, ctx.engine);
        let answer = planner.query_file(FileIdentityQuery::ContentKey { ed2k, size }, fields)?;

        match answer {
            FileAnswer::NotFound => Err(PipelineError::NotFound),
            FileAnswer::Found(decoded) => {
                record.set("fid", decoded.fid.to_string());
                record.state = RecordState::Identified;
                for (name, value) in decoded.values {
                    record.set(name, field_value_to_string(&value));
                }
                derive_helper_tags(record);
                record.state = RecordState::MetadataReady;
                Ok(())
            }
        }
    }
}

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{4}").unwrap());
static RESOLUTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"x(360|480|720|1080|2160)").unwrap());

/// Fills in rename-friendly attributes not returned directly by the wire
/// protocol: falls back episode/anime English names to their romaji
/// counterparts when blank, and derives `year_start`/`year_end`/
/// `resolution_abbr` from the raw `year`/`resolution` fields.
fn derive_helper_tags(record: &mut Record) {
    let episode_name_blank = record.get("episode_name").map(str::trim).unwrap_or("").is_empty();
    if episode_name_blank {
        if let Some(romaji) = record.get("episode_name_romaji").map(str::to_string) {
            record.set("episode_name", romaji);
        }
    }

    let english_name_blank = record.get("english_name").map(str::trim).unwrap_or("").is_empty();
    if english_name_blank {
        if let Some(romaji) = record.get("romaji_name").map(str::to_string) {
            record.set("english_name", romaji);
        }
    }

    let year = record.get("year").unwrap_or("").to_string();
    let years: Vec<&str> = YEAR_RE.find_iter(&year).map(|m| m.as_str()).collect();
    match (years.first(), years.last()) {
        (Some(&first), Some(&last)) => {
            let (first, last) = (first.to_string(), last.to_string());
            record.set("year_start", first);
            record.set("year_end", last);
        }
        _ => {
            record.set("year_start", year.clone());
            record.set("year_end", year);
        }
    }

    let resolution = record.get("resolution").unwrap_or("").to_string();
    let abbr = RESOLUTION_RE
        .captures(&resolution)
        .map(|caps| format!("{}p", &caps[1]))
        .unwrap_or(resolution);
    record.set("resolution_abbr", abbr);
}

fn field_value_to_string(value: &FieldValue) -> String {
    match value {
        FieldValue::Int(Some(v)) => v.to_string(),
        FieldValue::Int(None) => String::new(),
        FieldValue::Str(s) => s.clone(),
        FieldValue::Timestamp(Some(v)) => v.to_string(),
        FieldValue::Timestamp(None) => String::new(),
        FieldValue::ListStr(items) => items.join(", "),
        FieldValue::ListInt(items) => items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", "),
        FieldValue::Opaque(s) => s.clone(),
    }
}

/// Places the file at its formatted destination (move/hard-link/symlink).
pub struct RenameOperation {
    pub target_dir: std::path::PathBuf,
    pub config: RenameConfig,
}

impl Operation for RenameOperation {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn run(&mut self, record: &mut Record, _ctx: &mut OperationContext) -> Result<(), PipelineError> {
        if let Some(aired) = record.get("aired").map(str::to_string) {
            let formatted_aired = format_aired(&aired, self.config.aired_date_format.as_deref());
            record.set("aired", formatted_aired);
        }
        let formatted = format_name(&self.config.format, record);
        let extension = record.path.extension().and_then(|e| e.to_str());

        let dir = if self.config.keep_structure {
            record.path.parent().map(|p| self.target_dir.join(p)).unwrap_or_else(|| self.target_dir.clone())
        } else {
            self.target_dir.clone()
        };
        let target = resolve_target(&dir, &formatted, extension);

        place_file(&record.path, &target, self.config.mode)?;
        record.path = target;
        record.state = RecordState::Renamed;

        if self.config.delete_empty {
            if let Some(parent) = record.path.parent() {
                let _ = std::fs::remove_dir(parent);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_value_to_string_formats_each_variant() {
        assert_eq!(field_value_to_string(&FieldValue::Int(Some(5))), "5");
        assert_eq!(field_value_to_string(&FieldValue::Int(None)), "");
        assert_eq!(field_value_to_string(&FieldValue::Str("x".into())), "x");
        assert_eq!(
            field_value_to_string(&FieldValue::ListStr(vec!["a".into(), "b".into()])),
            "a, b"
        );
    }

    #[test]
    fn derive_helper_tags_falls_back_romaji_when_english_blank() {
        let mut record = Record::new("/tmp/x.mkv");
        record.set("episode_name", "");
        record.set("episode_name_romaji", "Daisan Wa");
        record.set("english_name", "");
        record.set("romaji_name", "Naruto");
        record.set("year", "2002");
        record.set("resolution", "1280x720");

        derive_helper_tags(&mut record);

        assert_eq!(record.get("episode_name"), Some("Daisan Wa"));
        assert_eq!(record.get("english_name"), Some("Naruto"));
        assert_eq!(record.get("year_start"), Some("2002"));
        assert_eq!(record.get("year_end"), Some("2002"));
        assert_eq!(record.get("resolution_abbr"), Some("720p"));
    }

    #[test]
    fn derive_helper_tags_spans_year_range() {
        let mut record = Record::new("/tmp/x.mkv");
        record.set("year", "2002-2003");
        record.set("resolution", "unknown");

        derive_helper_tags(&mut record);

        assert_eq!(record.get("year_start"), Some("2002"));
        assert_eq!(record.get("year_end"), Some("2003"));
        assert_eq!(record.get("resolution_abbr"), Some("unknown"));
    }

    #[test]
    fn hash_operation_populates_ed2k_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"hello").unwrap();

        let mut cache = CacheStore::open_in_memory().unwrap();
        let mut record = Record::new(&path);
        // `HashOperation` never touches the engine, so we exercise it with
        // a throwaway context built from a socket that is never used.
        let dummy_paths = anidb_transport::PathsConfig::with_dir(dir.path());
        let mut engine = anidb_transport::Engine::connect(
            anidb_transport::EngineConfig {
                server_addr: "127.0.0.1:42001".parse().unwrap(),
                local_addr: "127.0.0.1:42101".parse().unwrap(),
                username: "u".into(),
                password: "p".into(),
                api_key: None,
                client_name: "anidbcli".into(),
                client_version: 1,
                persistent_session: false,
            },
            dummy_paths,
        )
        .unwrap();
        let mut ctx = OperationContext { cache: &mut cache, engine: &mut engine };

        HashOperation.run(&mut record, &mut ctx).unwrap();
        assert_eq!(record.get("size"), Some("5"));
        assert_eq!(record.state, RecordState::Hashed);
    }
}
