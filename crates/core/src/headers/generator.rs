//! Header generator stage: one header document per edition, created once.

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::fsutil;
use crate::pipeline::{Stage, StageContext, StageError, StageKind, StageReport};
use crate::xml;

use super::template::{EditionInfo, HeaderTemplate};
use super::today;

/// Creates missing header documents from a template.
///
/// Existing headers are never touched, so manual edits survive re-runs.
pub struct HeaderGenerator {
    template: HeaderTemplate,
}

impl HeaderGenerator {
    pub fn new(template: HeaderTemplate) -> Self {
        Self { template }
    }
}

#[async_trait]
impl Stage for HeaderGenerator {
    fn kind(&self) -> StageKind {
        StageKind::Headers
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError> {
        let mut report = StageReport::new(StageKind::Headers);
        let dir = ctx.input();
        let today = today();

        for path in fsutil::list_xml_files(dir, false)
            .await
            .map_err(StageError::io(dir))?
        {
            let key = fsutil::file_stem(&path);
            let target = ctx.output_dir.join(fsutil::file_name(&path));

            let text = fs::read_to_string(&path).await.map_err(StageError::io(&path))?;
            let edition = match xml::parse(&text) {
                Ok(doc) => doc,
                Err(e) => {
                    report.skip(fsutil::file_name(&path), e.to_string());
                    continue;
                }
            };
            let info = EditionInfo::from_edition(key, &edition.root);
            let selected = match &info.doc_id {
                Some(id) => ctx.includes(id),
                None => ctx.includes_unknown(),
            };
            if !selected {
                continue;
            }

            let header = self.template.instantiate(&info, &today);
            let created = fsutil::write_new(&target, header.to_xml().as_bytes())
                .await
                .map_err(StageError::io(&target))?;
            if created {
                debug!(path = %target.display(), key = %info.key, "Created header");
            }
            report.record(created);
        }
        Ok(report)
    }
}
