//! End-to-end runs over a scratch tree with the mock platform and store.
//!
//! These tests cover:
//! - Byte-identical output when the whole pipeline runs twice
//! - A fetch where one of three documents is missing remotely
//! - Rename collisions leaving the editions untouched
//! - Header generation and filling never discarding existing values

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use okar_core::config::{FixerConfig, PathsConfig, PlatformConfig};
use okar_core::fetcher::Fetcher;
use okar_core::fixer::Fixer;
use okar_core::headers::{HeaderFiller, HeaderGenerator, HeaderTemplate};
use okar_core::initial_page::InitialPageStage;
use okar_core::normalizer::Normalizer;
use okar_core::renamer::{CanonicalNamer, Renamer};
use okar_core::testing::{fixtures, MockMetadataStore, MockPlatform};
use okar_core::transformer::{NativeTransformer, TransformStage};
use okar_core::{ExhaustionPolicy, MetadataRecord, Pipeline, Stage, StageError, StageKind};

const COLLECTION: u64 = 258178;

/// Scratch tree plus the mocks behind it.
struct Harness {
    dir: TempDir,
    platform: Arc<MockPlatform>,
    store: Arc<MockMetadataStore>,
}

impl Harness {
    async fn new() -> Self {
        let platform = Arc::new(MockPlatform::new());
        platform
            .add_document(COLLECTION, fixtures::overview("6981834", "1750_WSTLA-OKA-B1-1-095-1", 3, true))
            .await;
        platform
            .add_document(COLLECTION, fixtures::overview("10651984", "1751_WSTLA-OKA-B1-1-096-1", 2, true))
            .await;

        let store = Arc::new(MockMetadataStore::new());
        store
            .set_record(
                MetadataRecord::new("WSTLA-OKA-B1-1-095-1")
                    .with("Title", "Oberkammeramtsrechnung 1750")
                    .with("Description", "Einnahmen und Ausgaben der Stadt Wien")
                    .with("CoverageStartDate", "1750")
                    .with("Creator1/Title", "Oberkämmerer")
                    .with("Creator1/FirstName", "Johann")
                    .with("Creator1/LastName", "Weber")
                    .with("Creator1/PersonalName", "Oberkämmerer"),
            )
            .await;

        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
            platform,
            store,
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn fetcher(&self) -> Fetcher {
        let config = PlatformConfig {
            collections: vec![COLLECTION],
            ..PlatformConfig::default()
        };
        Fetcher::new(self.platform.clone(), config, ExhaustionPolicy::SkipItem).unwrap()
    }

    fn stages(&self) -> Vec<Box<dyn Stage>> {
        vec![
            Box::new(self.fetcher()),
            Box::new(Normalizer::new()),
            Box::new(TransformStage::new(Arc::new(NativeTransformer::new()))),
            Box::new(Renamer::new(CanonicalNamer::new(r"\d{4}_(WSTLA-OKA.*)").unwrap())),
            Box::new(Fixer::new(&FixerConfig::default()).unwrap()),
            Box::new(InitialPageStage::new().with_mets_dir(self.root().join("data/mets"))),
            Box::new(HeaderGenerator::new(HeaderTemplate::builtin("[tbd]").unwrap())),
            Box::new(HeaderFiller::new(self.store.clone(), "[tbd]")),
        ]
    }

    fn pipeline(&self, ids: &[&str]) -> Pipeline {
        let mut pipeline = Pipeline::new(PathsConfig::rooted(self.root()))
            .with_doc_ids(ids.iter().map(|id| id.to_string()));
        for stage in self.stages() {
            pipeline.push(stage);
        }
        pipeline
    }

    /// File name to contents of every XML file in a directory.
    fn snapshot(&self, relative: &str) -> BTreeMap<String, String> {
        let mut files = BTreeMap::new();
        let Ok(entries) = std::fs::read_dir(self.root().join(relative)) else {
            return files;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".xml") && !name.starts_with('.') {
                files.insert(name, std::fs::read_to_string(entry.path()).unwrap());
            }
        }
        files
    }
}

#[tokio::test]
async fn test_full_pipeline_twice_is_byte_identical() {
    let harness = Harness::new().await;

    let report = harness.pipeline(&[]).run().await.unwrap();
    assert_eq!(report.stages.len(), 8);
    assert_eq!(report.stage(StageKind::Fetch).unwrap().processed, 2);

    let editions = harness.snapshot("data/editions");
    let headers = harness.snapshot("tei_headers");
    assert_eq!(
        editions.keys().collect::<Vec<_>>(),
        vec!["WSTLA-OKA-B1-1-095-1.xml", "WSTLA-OKA-B1-1-096-1.xml"]
    );
    assert_eq!(headers.len(), 2);
    assert!(harness.snapshot("data/staging").is_empty());

    // Schema order after the fixer.
    for text in editions.values() {
        let doc = okar_core::xml::parse(text).unwrap();
        assert!(doc.root.is("TEI"));
        let order: Vec<&str> = doc.root.elements().map(|el| el.local_name()).collect();
        assert_eq!(order, vec!["teiHeader", "facsimile", "text"]);
    }

    // Only the header with a record got filled.
    let filled = &headers["WSTLA-OKA-B1-1-095-1.xml"];
    assert!(filled.contains("Oberkammeramtsrechnung 1750"));
    assert!(filled.contains("<origDate when=\"1750\"/>"));
    assert!(filled.contains("xml:id=\"weber\""));
    let fill = report.stage(StageKind::FillHeaders).unwrap();
    assert_eq!(fill.processed, 1);
    assert_eq!(fill.skipped.len(), 1);

    let second = harness.pipeline(&[]).run().await.unwrap();
    assert_eq!(harness.snapshot("data/editions"), editions);
    assert_eq!(harness.snapshot("tei_headers"), headers);
    assert_eq!(second.stage(StageKind::Normalize).unwrap().skipped.len(), 0);
    assert_eq!(second.stage(StageKind::Headers).unwrap().processed, 0);
    assert_eq!(second.stage(StageKind::FillHeaders).unwrap().processed, 0);
}

#[tokio::test]
async fn test_fetch_skips_missing_document() {
    let harness = Harness::new().await;
    harness
        .platform
        .add_document(COLLECTION, fixtures::overview("7714156", "1752_WSTLA-OKA-B1-1-097-1", 1, true))
        .await;
    harness.platform.fail_mets("7714156", 404).await;

    let pipeline = Pipeline::new(PathsConfig::rooted(harness.root()))
        .with_doc_ids(["6981834", "10651984", "7714156"].map(String::from))
        .with_stage(Box::new(harness.fetcher()));
    let report = pipeline.run().await.unwrap();

    let fetch = report.stage(StageKind::Fetch).unwrap();
    assert_eq!(fetch.processed, 2);
    assert_eq!(fetch.skipped.len(), 1);
    assert_eq!(fetch.skipped[0].id, "7714156");

    let raw = harness.root().join("data/mets").join(COLLECTION.to_string());
    assert!(raw.join("6981834_mets.xml").exists());
    assert!(raw.join("10651984_mets.xml").exists());
    assert!(!raw.join("7714156_mets.xml").exists());
}

#[tokio::test]
async fn test_rename_collision_writes_nothing() {
    let harness = Harness::new().await;
    let staging = harness.root().join("data/staging");
    std::fs::create_dir_all(&staging).unwrap();
    for doc_id in ["1", "2"] {
        std::fs::write(
            staging.join(format!("{}.xml", doc_id)),
            fixtures::edition("1750_WSTLA-OKA-B1-1-095-1", doc_id, &["a_00001.tif"]),
        )
        .unwrap();
    }

    let pipeline = Pipeline::new(PathsConfig::rooted(harness.root())).with_stage(Box::new(
        Renamer::new(CanonicalNamer::new(r"\d{4}_(WSTLA-OKA.*)").unwrap()),
    ));
    let err = pipeline.run().await.unwrap_err();

    assert_eq!(err.stage, StageKind::Rename);
    assert!(matches!(err.source, StageError::Collision { .. }));
    assert!(harness.snapshot("data/editions").is_empty());
    assert_eq!(harness.snapshot("data/staging").len(), 2);
}

#[tokio::test]
async fn test_headers_keep_manual_and_filled_values() {
    let harness = Harness::new().await;
    harness.pipeline(&[]).run().await.unwrap();

    let path = harness.root().join("tei_headers/WSTLA-OKA-B1-1-096-1.xml");
    let edited = std::fs::read_to_string(&path)
        .unwrap()
        .replacen("<extent>[tbd]</extent>", "<extent>96 Blätter</extent>", 1);
    std::fs::write(&path, &edited).unwrap();

    // The store now returns blanks for a field filled earlier.
    harness
        .store
        .set_record(
            MetadataRecord::new("WSTLA-OKA-B1-1-095-1")
                .with("Title", "")
                .with("Description", ""),
        )
        .await;
    harness.pipeline(&[]).run().await.unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), edited);
    let filled = std::fs::read_to_string(harness.root().join("tei_headers/WSTLA-OKA-B1-1-095-1.xml")).unwrap();
    assert!(filled.contains("Oberkammeramtsrechnung 1750"));
    assert!(filled.contains("Einnahmen und Ausgaben der Stadt Wien"));
}

#[tokio::test]
async fn test_doc_filter_limits_every_stage() {
    let harness = Harness::new().await;
    let report = harness.pipeline(&["10651984"]).run().await.unwrap();

    assert_eq!(report.stage(StageKind::Fetch).unwrap().processed, 1);
    assert_eq!(
        harness.snapshot("data/editions").keys().collect::<Vec<_>>(),
        vec!["WSTLA-OKA-B1-1-096-1.xml"]
    );
    assert_eq!(harness.store.lookups().await, vec!["WSTLA-OKA-B1-1-096-1".to_string()]);
}
