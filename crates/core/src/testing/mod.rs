//! Test doubles for the remote services plus document fixtures.
//!
//! The mocks keep their state behind `Arc<RwLock<..>>` so a test can keep a
//! handle, hand a clone to a stage and inspect recorded calls afterwards.
//!
//! # Example
//!
//! ```rust,ignore
//! use okar_core::testing::{fixtures, MockPlatform};
//!
//! let platform = Arc::new(MockPlatform::new());
//! platform.add_document(258178, fixtures::overview("6981834", "1750_WSTLA-OKA-B1-1-095-1", 3, true)).await;
//! platform.fail_mets("7714156", 404).await;
//! ```

mod mock_metadata;
mod mock_platform;

pub use mock_metadata::MockMetadataStore;
pub use mock_platform::MockPlatform;

/// Document builders for tests.
pub mod fixtures {
    use crate::platform::{DocumentOverview, PageInfo};

    /// Transkribus-style image file name of a page.
    pub fn image_file_name(title: &str, page: usize) -> String {
        let stem = title.split_once('_').map(|(_, rest)| rest).unwrap_or(title);
        format!("{}_{}.jpg", stem.replace(['-', ' '], "_"), page)
    }

    /// Overview of a document with `pages` pages.
    pub fn overview(doc_id: &str, title: &str, pages: usize, transcribed: bool) -> DocumentOverview {
        DocumentOverview {
            doc_id: doc_id.to_string(),
            title: title.to_string(),
            transcribed_lines: 0,
            transcribed_pages: 0,
            pages: (1..=pages)
                .map(|n| PageInfo {
                    number: n as u32,
                    image_file_name: image_file_name(title, n),
                    status: transcribed.then(|| "IN_PROGRESS".to_string()),
                    transcript_count: usize::from(transcribed),
                })
                .collect(),
        }
    }

    /// METS export as produced by Transkribus.
    pub fn transkribus_mets(doc_id: &str, title: &str, pages: usize) -> String {
        let mut files = String::new();
        let mut pointers = String::new();
        for n in 1..=pages {
            files.push_str(&format!(
                "        <ns3:file ID=\"IMG_{n}\" SEQ=\"{n}\" MIMETYPE=\"image/jpeg\">\n          <ns3:FLocat LOCTYPE=\"OTHER\" OTHERLOCTYPE=\"FILE\" ns2:type=\"simple\" ns2:href=\"https://files.transkribus.eu/Get?id={doc_id}{n:05}&amp;fileType=view\"/>\n        </ns3:file>\n"
            ));
            pointers.push_str(&format!(
                "      <ns3:div ID=\"PAGE_{n}\" ORDER=\"{n}\" TYPE=\"SINGLE_PAGE\"><ns3:fptr><ns3:area FILEID=\"IMG_{n}\"/></ns3:fptr></ns3:div>\n"
            ));
        }

        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<ns3:mets xmlns:ns2="http://www.w3.org/1999/xlink" xmlns:ns3="http://www.loc.gov/METS/" OBJID="{doc_id}">
  <ns3:metsHdr CREATEDATE="2024-08-19T10:00:00.000+02:00"/>
  <ns3:amdSec ID="SOURCE">
    <ns3:sourceMD ID="MD_ORIG">
      <ns3:mdWrap MDTYPE="OTHER" OTHERMDTYPE="TRP_DOC_MD">
        <ns3:xmlData>
          <trpDocMetadata>
            <docId>{doc_id}</docId>
            <title>{title}</title>
            <uploader>archiv@example.org</uploader>
            <nrOfPages>{pages}</nrOfPages>
            <desc></desc>
          </trpDocMetadata>
        </ns3:xmlData>
      </ns3:mdWrap>
    </ns3:sourceMD>
  </ns3:amdSec>
  <ns3:fileSec>
    <ns3:fileGrp ID="MASTER">
      <ns3:fileGrp ID="IMG">
{files}      </ns3:fileGrp>
    </ns3:fileGrp>
  </ns3:fileSec>
  <ns3:structMap ID="TRP_STRUCTMAP" TYPE="MANUSCRIPT">
    <ns3:div ID="TRP_DOC_DIV" ADMID="MD_ORIG">
{pointers}    </ns3:div>
  </ns3:structMap>
</ns3:mets>
"#
        )
    }

    /// A minimal edition as the transform stage stages it.
    pub fn edition(title: &str, doc_id: &str, images: &[&str]) -> String {
        let mut surfaces = String::new();
        let mut pages = String::new();
        for (i, url) in images.iter().enumerate() {
            let n = i + 1;
            surfaces.push_str(&format!(
                "    <surface xml:id=\"facs_{n}\" n=\"{n}\">\n      <graphic url=\"{url}\"/>\n    </surface>\n"
            ));
            pages.push_str(&format!(
                "        <pb facs=\"#facs_{n}\" n=\"{n}\" xml:id=\"img_{n:04}\"/>\n        <ab>Zeile {n}</ab>\n"
            ));
        }

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<TEI xmlns="http://www.tei-c.org/ns/1.0">
  <teiHeader>
    <fileDesc>
      <titleStmt>
        <title type="main">{title}</title>
      </titleStmt>
      <publicationStmt>
        <p>Transkribus export</p>
      </publicationStmt>
      <sourceDesc>
        <bibl>
          <title>{title}</title>
          <idno type="Transkribus">{doc_id}</idno>
        </bibl>
      </sourceDesc>
    </fileDesc>
  </teiHeader>
  <facsimile>
{surfaces}  </facsimile>
  <text>
    <body>
      <div>
{pages}      </div>
    </body>
  </text>
</TEI>
"#
        )
    }
}
