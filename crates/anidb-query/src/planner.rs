//! Cache-first query planning (C7, spec.md §4.7): consult the cache
//! before the network, fetch only what's missing, and persist whatever
//! the server sends back.

use std::collections::HashMap;

use anidb_cache::CacheStore;
use anidb_proto::{
    decode_animedesc_body, decode_field_value, sort_fields, unescape_column, AnimeDescBody,
    AnimeDescQuery, DecodedFile, FieldDescriptor, FieldValue, FileIdentityQuery, FileQuery,
    ProtoError, Request,
};
use anidb_transport::Engine;

use crate::error::QueryError;

#[derive(Debug, Clone, PartialEq)]
pub enum FileAnswer {
    Found(DecodedFile),
    NotFound,
}

pub struct QueryPlanner<'a> {
    cache: &'a mut CacheStore,
    engine: &'a mut Engine,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(cache: &'a mut CacheStore, engine: &'a mut Engine) -> Self {
        Self { cache, engine }
    }

    /// Resolves a `FileRequest(identity, fields)`: cache lookup, negative
    /// suppression, residual network fetch, then cache persistence.
    pub fn query_file(
        &mut self,
        identity: FileIdentityQuery,
        fields: Vec<&'static FieldDescriptor>,
    ) -> Result<FileAnswer, QueryError> {
        if let FileIdentityQuery::ContentKey { ed2k, size } = &identity {
            if self.cache.is_known_negative(ed2k, *size)? {
                log::debug!("known negative, suppressing network call");
                return Ok(FileAnswer::NotFound);
            }
        }

        let fid = match &identity {
            FileIdentityQuery::ContentKey { ed2k, size } => self.cache.fid_for(ed2k, *size)?,
            FileIdentityQuery::ServerKey { fid } => Some(*fid),
        };

        let mut collected: HashMap<&'static str, FieldValue> = HashMap::new();
        let mut residual = fields.clone();

        if let Some(fid) = fid {
            let names: Vec<&str> = fields.iter().map(|f| f.name).collect();
            let raw = self.cache.get_fields(fid, &names)?;
            residual.retain(|f| !raw.contains_key(f.name));
            for f in &fields {
                if let Some(v) = raw.get(f.name) {
                    collected.insert(f.name, decode_field_value(f.ty, v));
                }
            }
        }

        if residual.is_empty() {
            if let Some(fid) = fid {
                return Ok(FileAnswer::Found(DecodedFile {
                    fid,
                    values: collected.into_iter().collect(),
                }));
            }
        }

        let residual = sort_fields(residual);
        let query_identity = match fid {
            Some(fid) => FileIdentityQuery::ServerKey { fid },
            None => identity.clone(),
        };
        let mut req = Request::File(FileQuery {
            identity: query_identity,
            fields: residual.clone(),
            session: None,
            tolerate_truncation: false,
        });

        let raw = self.engine.call(&mut req)?;
        match raw.code {
            220 => {
                let body = raw
                    .body
                    .ok_or_else(|| ProtoError::Malformed("empty 220 body".to_string()))?;
                let (new_fid, decoded) = decode_with_raw_columns(&body, &residual)?;

                if let FileIdentityQuery::ContentKey { ed2k, size } = &identity {
                    self.cache.put_identity(ed2k, *size, new_fid)?;
                }
                let persisted: Vec<(&str, String)> =
                    decoded.iter().map(|(name, raw, _)| (*name, raw.clone())).collect();
                self.cache.put_fields(new_fid, &persisted, None)?;

                for (name, _, value) in decoded {
                    collected.insert(name, value);
                }
                Ok(FileAnswer::Found(DecodedFile {
                    fid: new_fid,
                    values: collected.into_iter().collect(),
                }))
            }
            320 => {
                if let FileIdentityQuery::ContentKey { ed2k, size } = &identity {
                    self.cache.bump_negative(ed2k, *size)?;
                }
                Ok(FileAnswer::NotFound)
            }
            other => Err(QueryError::UnexpectedCode(other)),
        }
    }

    /// Fetches a single `ANIMEDESC` part. Per spec.md §1's Non-goals, this
    /// crate does not drive the full pagination loop (`next_request`) on
    /// the caller's behalf beyond this one call; it only decodes the part
    /// requested, honouring the bbcode slash-preservation quirk.
    pub fn describe_anime(&mut self, aid: u32, part: u32) -> Result<AnimeDescBody, QueryError> {
        let mut req = Request::AnimeDesc(AnimeDescQuery { aid, cur_part: part, max_parts: 0, session: None });
        let raw = self.engine.call(&mut req)?;
        let body = raw
            .body
            .ok_or_else(|| ProtoError::Malformed("empty 233 body".to_string()))?;
        Ok(decode_animedesc_body(&body)?)
    }
}

/// Like [`anidb_proto::decode_file_body`], but keeps the raw unescaped
/// column text alongside the decoded value so the planner can persist
/// exactly what the server sent.
fn decode_with_raw_columns(
    body: &str,
    fields: &[&'static FieldDescriptor],
) -> Result<(u32, Vec<(&'static str, String, FieldValue)>), ProtoError> {
    let columns: Vec<String> = body.split('|').map(|c| unescape_column(c, false)).collect();
    let expected = 1 + fields.len();
    if columns.len() < expected {
        return Err(ProtoError::Truncated { expected, got: columns.len() });
    }
    let fid: u32 = columns[0]
        .parse()
        .map_err(|_| ProtoError::Malformed(columns[0].clone()))?;

    let mut out = Vec::with_capacity(fields.len());
    for (i, f) in fields.iter().enumerate() {
        if let Some(col) = columns.get(i + 1) {
            out.push((f.name, col.clone(), decode_field_value(f.ty, col)));
        }
    }
    Ok((fid, out))
}

#[cfg(test)]
mod tests {
    use std::net::{SocketAddr, UdpSocket};

    use anidb_proto::{field_by_name, sort_fields};
    use anidb_transport::{Engine, EngineConfig, PathsConfig};

    use super::*;

    fn spawn_fake_server(addr: SocketAddr, file_body: &'static str) -> std::thread::JoinHandle<()> {
        let socket = UdpSocket::bind(addr).unwrap();
        std::thread::spawn(move || {
            let mut buf = [0u8; 1500];
            // AUTH
            let (_, peer) = socket.recv_from(&mut buf).unwrap();
            socket.send_to(b"200 sess123 LOGIN ACCEPTED", peer).unwrap();
            // FILE
            let (_, peer) = socket.recv_from(&mut buf).unwrap();
            let reply = format!("220 FILE\n{file_body}\n");
            socket.send_to(reply.as_bytes(), peer).unwrap();
        })
    }

    fn spawn_fake_animedesc_server(addr: SocketAddr, body: &'static str) -> std::thread::JoinHandle<()> {
        let socket = UdpSocket::bind(addr).unwrap();
        std::thread::spawn(move || {
            let mut buf = [0u8; 1500];
            let (_, peer) = socket.recv_from(&mut buf).unwrap();
            socket.send_to(b"200 sess123 LOGIN ACCEPTED", peer).unwrap();
            let (_, peer) = socket.recv_from(&mut buf).unwrap();
            let reply = format!("233 ANIMEDESC\n{body}\n");
            socket.send_to(reply.as_bytes(), peer).unwrap();
        })
    }

    fn make_engine(server_addr: SocketAddr, local_addr: SocketAddr) -> Engine {
        let config = EngineConfig {
            server_addr,
            local_addr,
            username: "tester".into(),
            password: "pw".into(),
            api_key: None,
            client_name: "anidbcli".into(),
            client_version: 1,
            persistent_session: false,
        };
        let dir = tempfile::tempdir().unwrap();
        Engine::connect(config, PathsConfig::with_dir(dir.path())).unwrap()
    }

    #[test]
    fn cache_miss_fetches_and_persists() {
        let server_addr: SocketAddr = "127.0.0.1:41001".parse().unwrap();
        let local_addr: SocketAddr = "127.0.0.1:41101".parse().unwrap();
        let handle = spawn_fake_server(server_addr, "777|999|high");

        let mut cache = CacheStore::open_in_memory().unwrap();
        let mut engine = make_engine(server_addr, local_addr);
        let fields = sort_fields(vec![field_by_name("aid").unwrap(), field_by_name("quality").unwrap()]);

        let mut planner = QueryPlanner::new(&mut cache, &mut engine);
        let answer = planner
            .query_file(
                FileIdentityQuery::ContentKey { ed2k: "e".repeat(32), size: 123 },
                fields,
            )
            .unwrap();

        match answer {
            FileAnswer::Found(decoded) => {
                assert_eq!(decoded.fid, 777);
                assert_eq!(decoded.get("aid"), Some(&FieldValue::Int(Some(999))));
            }
            FileAnswer::NotFound => panic!("expected a match"),
        }

        assert_eq!(cache.fid_for(&"e".repeat(32), 123).unwrap(), Some(777));
        handle.join().unwrap();
    }

    #[test]
    fn cache_hit_serves_without_touching_network() {
        let mut cache = CacheStore::open_in_memory().unwrap();
        cache.put_identity(&"f".repeat(32), 555, 42).unwrap();
        cache.put_fields(42, &[("aid", "100".into())], None).unwrap();

        // No fake server is started; if the planner tried the network this
        // call would time out against a closed port.
        let server_addr: SocketAddr = "127.0.0.1:41002".parse().unwrap();
        let local_addr: SocketAddr = "127.0.0.1:41102".parse().unwrap();
        let mut engine = make_engine(server_addr, local_addr);
        let fields = sort_fields(vec![field_by_name("aid").unwrap()]);

        let mut planner = QueryPlanner::new(&mut cache, &mut engine);
        let answer = planner
            .query_file(FileIdentityQuery::ContentKey { ed2k: "f".repeat(32), size: 555 }, fields)
            .unwrap();

        match answer {
            FileAnswer::Found(decoded) => {
                assert_eq!(decoded.fid, 42);
                assert_eq!(decoded.get("aid"), Some(&FieldValue::Int(Some(100))));
            }
            FileAnswer::NotFound => panic!("expected a match"),
        }
    }

    #[test]
    fn describe_anime_preserves_slashes_in_content_column() {
        let server_addr: SocketAddr = "127.0.0.1:41003".parse().unwrap();
        let local_addr: SocketAddr = "127.0.0.1:41103".parse().unwrap();
        let handle = spawn_fake_animedesc_server(server_addr, "0|1|[spoiler]1/2 chance[/spoiler]");

        let mut cache = CacheStore::open_in_memory().unwrap();
        let mut engine = make_engine(server_addr, local_addr);
        let mut planner = QueryPlanner::new(&mut cache, &mut engine);
        let body = planner.describe_anime(42, 0).unwrap();

        assert_eq!(body.cur_part, 0);
        assert_eq!(body.max_parts, 1);
        assert_eq!(body.content, "[spoiler]1/2 chance[/spoiler]");
        handle.join().unwrap();
    }
}
