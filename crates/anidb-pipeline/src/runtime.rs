//! The single-coordinator-thread pipeline runtime (spec.md §4.8/§5):
//! records are processed strictly in input order, one operation at a
//! time; a failure aborts only the offending record.

use crate::error::PipelineError;
use crate::operations::{Operation, OperationContext};
use crate::record::Record;

/// Summary of one record's run, surfaced to the output collaborator (the
/// CLI) once the pipeline finishes with it.
pub struct RecordOutcome {
    pub record: Record,
    pub error: Option<PipelineError>,
}

pub struct Pipeline {
    operations: Vec<Box<dyn Operation>>,
}

impl Pipeline {
    pub fn new(operations: Vec<Box<dyn Operation>>) -> Self {
        Self { operations }
    }

    /// Runs every record through every operation in declaration order.
    /// A record that fails an operation is marked `FAILED` and skipped
    /// for the remaining operations; other records are unaffected.
    pub fn run(&mut self, records: Vec<Record>, ctx: &mut OperationContext) -> Vec<RecordOutcome> {
        records
            .into_iter()
            .map(|mut record| {
                let mut last_error = None;
                for op in &mut self.operations {
                    if record.is_failed() {
                        break;
                    }
                    log::debug!("{:?}: running {}", record.path, op.name());
                    if let Err(e) = op.run(&mut record, ctx) {
                        record.fail(&e);
                        last_error = Some(e);
                        break;
                    }
                }
                RecordOutcome { record, error: last_error }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordState;

    struct AlwaysOk(&'static str, RecordState);
    impl Operation for AlwaysOk {
        fn name(&self) -> &'static str {
            self.0
        }
        fn run(&mut self, record: &mut Record, _ctx: &mut OperationContext) -> Result<(), PipelineError> {
            record.state = self.1;
            Ok(())
        }
    }

    struct AlwaysFail;
    impl Operation for AlwaysFail {
        fn name(&self) -> &'static str {
            "always-fail"
        }
        fn run(&mut self, _record: &mut Record, _ctx: &mut OperationContext) -> Result<(), PipelineError> {
            Err(PipelineError::NotFound)
        }
    }

    fn dummy_ctx<'a>(
        cache: &'a mut anidb_cache::CacheStore,
        engine: &'a mut anidb_transport::Engine,
    ) -> OperationContext<'a> {
        OperationContext { cache, engine }
    }

    fn dummy_engine(dir: &tempfile::TempDir, port: u16) -> anidb_transport::Engine {
        anidb_transport::Engine::connect(
            anidb_transport::EngineConfig {
                server_addr: format!("127.0.0.1:{port}").parse().unwrap(),
                local_addr: format!("127.0.0.1:{}", port + 1000).parse().unwrap(),
                username: "u".into(),
                password: "p".into(),
                api_key: None,
                client_name: "anidbcli".into(),
                client_version: 1,
                persistent_session: false,
            },
            anidb_transport::PathsConfig::with_dir(dir.path()),
        )
        .unwrap()
    }

    #[test]
    fn failure_in_one_record_does_not_affect_another() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = anidb_cache::CacheStore::open_in_memory().unwrap();
        let mut engine = dummy_engine(&dir, 43001);
        let mut ctx = dummy_ctx(&mut cache, &mut engine);

        let mut pipeline = Pipeline::new(vec![Box::new(AlwaysFail)]);
        let good = Record::new("/tmp/good.mkv");
        let bad = Record::new("/tmp/bad.mkv");
        let outcomes = pipeline.run(vec![good, bad], &mut ctx);

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].record.is_failed());
        assert!(outcomes[1].record.is_failed());
        assert!(outcomes[0].error.is_some());
    }

    #[test]
    fn successful_operations_advance_state_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = anidb_cache::CacheStore::open_in_memory().unwrap();
        let mut engine = dummy_engine(&dir, 43003);
        let mut ctx = dummy_ctx(&mut cache, &mut engine);

        let mut pipeline = Pipeline::new(vec![
            Box::new(AlwaysOk("hash", RecordState::Hashed)),
            Box::new(AlwaysOk("get-file-info", RecordState::MetadataReady)),
        ]);
        let outcomes = pipeline.run(vec![Record::new("/tmp/x.mkv")], &mut ctx);
        assert_eq!(outcomes[0].record.state, RecordState::MetadataReady);
        assert!(outcomes[0].error.is_none());
    }
}
