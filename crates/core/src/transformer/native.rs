//! Built-in METS to TEI mapping.
//!
//! Produces the structural skeleton of an edition: header with title and
//! source reference, one facsimile surface per page image and one page
//! break per page in the body. Page text needs the XSLT engine.

use async_trait::async_trait;
use tokio::fs;

use super::{TransformError, TransformJob, Transformer};
use crate::source::{year_of, SourceDocument};
use crate::xml::{self, Document, Element, TEI_NS, XML_ID};

const PUBLICATION_NOTE: &str = "Generated from the Transkribus METS export.";

/// Maps classified METS to a TEI skeleton without external tools.
#[derive(Debug, Default)]
pub struct NativeTransformer;

impl NativeTransformer {
    pub fn new() -> Self {
        Self
    }

    /// Builds the TEI document for already loaded METS text.
    pub fn build(&self, mets: &str, job: &TransformJob) -> Result<Document, TransformError> {
        let doc = xml::parse(mets)?;
        let source = SourceDocument::classify(&doc)?;
        let record = source.record();

        let date = year_of(&record.title).or_else(|| record.date.clone());
        let mut bibl = Element::new("bibl")
            .with_child(Element::new("title").with_text(record.title.clone()))
            .with_child(Element::new("date").with_text(date.unwrap_or_default()))
            .with_child(
                Element::new("idno")
                    .with_attr("type", "Transkribus")
                    .with_text(job.doc_id.clone()),
            );
        if let Some(description) = &record.description {
            bibl.push(Element::new("note").with_text(description.clone()));
        }

        let header = Element::new("teiHeader").with_child(
            Element::new("fileDesc")
                .with_child(
                    Element::new("titleStmt").with_child(
                        Element::new("title")
                            .with_attr("type", "main")
                            .with_text(record.title.clone()),
                    ),
                )
                .with_child(
                    Element::new("publicationStmt")
                        .with_child(Element::new("p").with_text(PUBLICATION_NOTE)),
                )
                .with_child(Element::new("sourceDesc").with_child(bibl)),
        );

        // Image names only apply when they line up with the METS pages.
        let names = job
            .image_names
            .as_ref()
            .filter(|names| names.len() == record.images.len());

        let mut facsimile = Element::new("facsimile");
        let mut div = Element::new("div");
        for (i, image) in record.images.iter().enumerate() {
            let n = i + 1;
            let url = names.map(|names| names[i].clone()).unwrap_or_else(|| image.href.clone());
            facsimile.push(
                Element::new("surface")
                    .with_attr(XML_ID, format!("facs_{}", n))
                    .with_attr("n", n.to_string())
                    .with_child(Element::new("graphic").with_attr("url", url)),
            );
            div.push(
                Element::new("pb")
                    .with_attr("facs", format!("#facs_{}", n))
                    .with_attr("n", n.to_string())
                    .with_attr(XML_ID, format!("img_{:04}", n)),
            );
            div.push(Element::new("ab"));
        }

        let root = Element::new("TEI")
            .with_attr("xmlns", TEI_NS)
            .with_child(header)
            .with_child(facsimile)
            .with_child(
                Element::new("text").with_child(Element::new("body").with_child(div)),
            );
        Ok(Document::new(root))
    }
}

#[async_trait]
impl Transformer for NativeTransformer {
    fn name(&self) -> &str {
        "native"
    }

    async fn transform(&self, job: &TransformJob) -> Result<String, TransformError> {
        let mets = fs::read_to_string(&job.mets_path).await?;
        Ok(self.build(&mets, job)?.to_xml())
    }
}
