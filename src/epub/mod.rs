//! EPUB assembler. Rebuilds the whole e-book from the ordered chapter list on every call
//! (mimetype, container, OPF, nav, NCX, stylesheet, one XHTML file per chapter).

use crate::checkpoint::write_atomic;
use crate::model::{Chapter, NovelInfo};
use std::io::{Cursor, Seek, Write};
use std::path::Path;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const CONTAINER_XML: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n  <rootfiles>\n    <rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n  </rootfiles>\n</container>";

const MIMETYPE: &[u8] = b"application/epub+zip";
const OEBPS_PREFIX: &str = "OEBPS/";
const STYLESHEET_HREF: &str = "style/novel.css";

/// Shared stylesheet, attached once per build. Every chapter heading forces a page break
/// except the first chapter's (`h1.first`); the first paragraph after a heading (or after
/// its attribution line) is not indented.
const STYLESHEET: &str = r#"@namespace url("http://www.w3.org/1999/xhtml");
body {
  font-family: Georgia, serif;
  line-height: 1.6;
  margin: 1em;
  text-align: justify;
}
h1 {
  text-align: center;
  margin-bottom: 0.5em;
  font-size: 1.8em;
  page-break-before: always;
}
h1.first {
  page-break-before: avoid;
}
p {
  text-indent: 1.5em;
  margin-bottom: 0.5em;
}
h1 + p,
p.attribution + p {
  text-indent: 0;
}
p.attribution em {
  font-style: italic;
}
"#;

/// Errors from the EPUB assembler.
#[derive(Debug, Error)]
pub enum EpubError {
    #[error("Cannot write EPUB: no chapters were captured.")]
    NoChapters,

    #[error("Cannot write EPUB: {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<std::io::Error> for EpubError {
    fn from(e: std::io::Error) -> Self {
        EpubError::Zip(zip::result::ZipError::Io(e))
    }
}

/// One chapter section: heading, optional attribution, paragraphs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub attribution: Option<String>,
    pub paragraphs: Vec<String>,
}

/// In-memory e-book ready to be serialized. Sections keep input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpubDocument {
    pub info: NovelInfo,
    pub sections: Vec<Section>,
    /// Put the nav page at the front of the reading order.
    pub include_nav_page: bool,
}

/// Build the document for `chapters` in exactly the given order.
pub fn build_document(info: &NovelInfo, chapters: &[Chapter]) -> EpubDocument {
    let sections = chapters
        .iter()
        .map(|ch| Section {
            title: ch.title.clone(),
            attribution: ch.attribution().map(String::from),
            paragraphs: ch.body_paragraphs.clone(),
        })
        .collect();
    EpubDocument {
        info: info.clone(),
        sections,
        include_nav_page: true,
    }
}

/// Build and write the EPUB for `chapters` to `path`, replacing any existing file.
pub fn write_epub(
    path: &Path,
    info: &NovelInfo,
    chapters: &[Chapter],
    include_nav_page: bool,
) -> Result<(), EpubError> {
    let mut doc = build_document(info, chapters);
    doc.include_nav_page = include_nav_page;
    let bytes = doc.to_bytes()?;
    write_atomic(path, &bytes).map_err(|e| EpubError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

impl EpubDocument {
    /// Serialize to EPUB 3 bytes. Zip entries carry a fixed timestamp, so equal documents
    /// serialize to equal bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EpubError> {
        if self.sections.is_empty() {
            return Err(EpubError::NoChapters);
        }
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        let options_stored = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .last_modified_time(zip::DateTime::default())
            .unix_permissions(0o644);
        let options_deflate = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default())
            .unix_permissions(0o644);

        // Mimetype first, uncompressed (required by EPUB spec)
        zip.start_file("mimetype", options_stored)?;
        zip.write_all(MIMETYPE)?;

        zip.start_file("META-INF/container.xml", options_deflate)?;
        zip.write_all(CONTAINER_XML)?;

        self.write_opf(&mut zip, options_deflate)?;
        self.write_nav_xhtml(&mut zip, options_deflate)?;
        self.write_ncx(&mut zip, options_deflate)?;

        zip.start_file(format!("{}{}", OEBPS_PREFIX, STYLESHEET_HREF), options_deflate)?;
        zip.write_all(STYLESHEET.as_bytes())?;

        self.write_chapters(&mut zip, options_deflate)?;

        let cursor = zip.finish()?;
        Ok(cursor.into_inner())
    }

    fn write_opf(
        &self,
        zip: &mut ZipWriter<impl Write + Seek>,
        options: SimpleFileOptions,
    ) -> Result<(), EpubError> {
        let mut manifest = format!(
            r#"    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="style" href="{}" media-type="text/css"/>
"#,
            STYLESHEET_HREF
        );
        let mut spine = String::new();
        if self.include_nav_page {
            spine.push_str("    <itemref idref=\"nav\"/>\n");
        }
        for i in 1..=self.sections.len() {
            manifest.push_str(&format!(
                "    <item id=\"{id}\" href=\"{id}.xhtml\" media-type=\"application/xhtml+xml\"/>\n",
                id = chapter_id(i)
            ));
            spine.push_str(&format!("    <itemref idref=\"{}\"/>\n", chapter_id(i)));
        }

        let opf = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">{id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:creator>{creator}</dc:creator>
    <dc:language>{language}</dc:language>
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{spine}  </spine>
</package>
"#,
            id = xml_escape(&self.info.identifier),
            title = xml_escape(&self.info.title),
            creator = xml_escape(&self.info.author),
            language = xml_escape(&self.info.language),
            manifest = manifest,
            spine = spine,
        );

        zip.start_file(format!("{}content.opf", OEBPS_PREFIX), options)?;
        zip.write_all(opf.as_bytes())?;
        Ok(())
    }

    fn write_nav_xhtml(
        &self,
        zip: &mut ZipWriter<impl Write + Seek>,
        options: SimpleFileOptions,
    ) -> Result<(), EpubError> {
        let mut nav_links = String::new();
        for (i, section) in self.sections.iter().enumerate() {
            nav_links.push_str(&format!(
                "      <li><a href=\"{}.xhtml\">{}</a></li>\n",
                chapter_id(i + 1),
                xml_escape(&section.title)
            ));
        }
        let nav = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
  <meta charset="UTF-8"/>
  <title>Table of Contents</title>
  <link rel="stylesheet" type="text/css" href="{css}"/>
</head>
<body>
  <nav epub:type="toc">
    <h1 class="first">Contents</h1>
    <ol>
{links}    </ol>
  </nav>
</body>
</html>
"#,
            css = STYLESHEET_HREF,
            links = nav_links
        );
        zip.start_file(format!("{}nav.xhtml", OEBPS_PREFIX), options)?;
        zip.write_all(nav.as_bytes())?;
        Ok(())
    }

    fn write_ncx(
        &self,
        zip: &mut ZipWriter<impl Write + Seek>,
        options: SimpleFileOptions,
    ) -> Result<(), EpubError> {
        let mut nav_points = String::new();
        for (i, section) in self.sections.iter().enumerate() {
            nav_points.push_str(&format!(
                r#"    <navPoint id="navpoint-{n}" playOrder="{n}">
      <navLabel><text>{label}</text></navLabel>
      <content src="{id}.xhtml"/>
    </navPoint>
"#,
                n = i + 1,
                label = xml_escape(&section.title),
                id = chapter_id(i + 1)
            ));
        }
        let ncx = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{uid}"/>
  </head>
  <docTitle>
    <text>{title}</text>
  </docTitle>
  <navMap>
{points}  </navMap>
</ncx>
"#,
            uid = xml_escape(&self.info.identifier),
            title = xml_escape(&self.info.title),
            points = nav_points
        );
        zip.start_file(format!("{}toc.ncx", OEBPS_PREFIX), options)?;
        zip.write_all(ncx.as_bytes())?;
        Ok(())
    }

    fn write_chapters(
        &self,
        zip: &mut ZipWriter<impl Write + Seek>,
        options: SimpleFileOptions,
    ) -> Result<(), EpubError> {
        for (i, section) in self.sections.iter().enumerate() {
            let html = render_section(section, i == 0);
            zip.start_file(
                format!("{}{}.xhtml", OEBPS_PREFIX, chapter_id(i + 1)),
                options,
            )?;
            zip.write_all(html.as_bytes())?;
        }
        Ok(())
    }
}

fn chapter_id(n: usize) -> String {
    format!("chapter-{:04}", n)
}

fn render_section(section: &Section, first: bool) -> String {
    let title = xml_escape(&section.title);
    let mut body = if first {
        format!("  <h1 class=\"first\">{}</h1>\n", title)
    } else {
        format!("  <h1>{}</h1>\n", title)
    };
    if let Some(editor) = &section.attribution {
        body.push_str(&format!(
            "  <p class=\"attribution\"><em>Edited by: {}</em></p>\n",
            xml_escape(editor)
        ));
    }
    for para in &section.paragraphs {
        body.push_str(&format!("  <p>{}</p>\n", xml_escape(para)));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
  <meta charset="UTF-8"/>
  <title>{title}</title>
  <link rel="stylesheet" type="text/css" href="{css}"/>
</head>
<body>
{body}</body>
</html>
"#,
        title = title,
        css = STYLESHEET_HREF,
        body = body
    )
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::read::ZipArchive;

    fn chapter(title: &str, editor: &str, paragraphs: &[&str]) -> Chapter {
        Chapter {
            source_url: format!("https://example.com/{}", title),
            chapter_number: None,
            title: title.to_string(),
            edited_by: editor.to_string(),
            body_paragraphs: paragraphs.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn info() -> NovelInfo {
        NovelInfo {
            title: "Chat Group".to_string(),
            author: "Unknown".to_string(),
            language: "en".to_string(),
            identifier: "https://example.com/novel/chapter-1".to_string(),
        }
    }

    fn read_entry(bytes: &[u8], name: &str) -> String {
        let mut zip = ZipArchive::new(Cursor::new(bytes)).expect("valid zip");
        let mut entry = zip.by_name(name).expect("entry present");
        let mut s = String::new();
        entry.read_to_string(&mut s).expect("utf-8 entry");
        s
    }

    #[test]
    fn empty_chapter_list_is_rejected() {
        let doc = build_document(&info(), &[]);
        assert!(matches!(doc.to_bytes(), Err(EpubError::NoChapters)));
    }

    #[test]
    fn archive_layout_starts_with_stored_mimetype() {
        let doc = build_document(&info(), &[chapter("One", "Unknown", &["Hello"])]);
        let bytes = doc.to_bytes().expect("serializes");
        let mut zip = ZipArchive::new(Cursor::new(bytes.as_slice())).expect("valid zip");
        let names: Vec<String> = zip.file_names().map(String::from).collect();
        for expected in [
            "mimetype",
            "META-INF/container.xml",
            "OEBPS/content.opf",
            "OEBPS/nav.xhtml",
            "OEBPS/toc.ncx",
            "OEBPS/style/novel.css",
            "OEBPS/chapter-0001.xhtml",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
        let first = zip.by_index(0).expect("first entry");
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), zip::CompressionMethod::Stored);
    }

    #[test]
    fn sections_keep_input_order_in_spine_and_toc() {
        let chapters = vec![
            chapter("Zeta", "Unknown", &["z"]),
            chapter("Alpha", "Unknown", &["a"]),
            chapter("Mid", "Unknown", &["m"]),
        ];
        let bytes = build_document(&info(), &chapters).to_bytes().expect("serializes");
        let nav = read_entry(&bytes, "OEBPS/nav.xhtml");
        let zeta = nav.find("Zeta").expect("Zeta in nav");
        let alpha = nav.find("Alpha").expect("Alpha in nav");
        let mid = nav.find("Mid").expect("Mid in nav");
        assert!(zeta < alpha && alpha < mid);
        assert_eq!(nav.matches("<li>").count(), 3);

        let ncx = read_entry(&bytes, "OEBPS/toc.ncx");
        assert_eq!(ncx.matches("<navPoint").count(), 3);
        assert!(ncx.find("Zeta").expect("Zeta") < ncx.find("Alpha").expect("Alpha"));

        let opf = read_entry(&bytes, "OEBPS/content.opf");
        let c1 = opf.find("<itemref idref=\"chapter-0001\"/>").expect("c1");
        let c3 = opf.find("<itemref idref=\"chapter-0003\"/>").expect("c3");
        assert!(opf.find("<itemref idref=\"nav\"/>").expect("nav") < c1);
        assert!(c1 < c3);

        assert!(read_entry(&bytes, "OEBPS/chapter-0002.xhtml").contains("<h1>Alpha</h1>"));
    }

    #[test]
    fn only_first_heading_avoids_page_break() {
        let chapters = vec![
            chapter("One", "Unknown", &["a"]),
            chapter("Two", "Unknown", &["b"]),
        ];
        let bytes = build_document(&info(), &chapters).to_bytes().expect("serializes");
        assert!(read_entry(&bytes, "OEBPS/chapter-0001.xhtml").contains("<h1 class=\"first\">One</h1>"));
        assert!(read_entry(&bytes, "OEBPS/chapter-0002.xhtml").contains("<h1>Two</h1>"));
        let css = read_entry(&bytes, "OEBPS/style/novel.css");
        assert!(css.contains("page-break-before: always"));
        assert!(css.contains("h1 + p"));
        assert!(css.contains("p.attribution + p"));
    }

    #[test]
    fn attribution_rendered_only_for_known_editor() {
        let chapters = vec![
            chapter("Edited", "Nyx", &["a"]),
            chapter("Plain", "Unknown", &["b"]),
        ];
        let bytes = build_document(&info(), &chapters).to_bytes().expect("serializes");
        assert!(read_entry(&bytes, "OEBPS/chapter-0001.xhtml")
            .contains("<p class=\"attribution\"><em>Edited by: Nyx</em></p>"));
        assert!(!read_entry(&bytes, "OEBPS/chapter-0002.xhtml").contains("attribution"));
    }

    #[test]
    fn first_paragraph_after_attribution_is_not_indented() {
        let chapters = vec![chapter("Edited", "Nyx", &["first", "second"])];
        let bytes = build_document(&info(), &chapters).to_bytes().expect("serializes");
        // The attribution line sits between the heading and the first paragraph, so the
        // sibling rule has to cover it.
        assert!(read_entry(&bytes, "OEBPS/chapter-0001.xhtml")
            .contains("<em>Edited by: Nyx</em></p>\n  <p>first</p>"));
        let css = read_entry(&bytes, "OEBPS/style/novel.css");
        let rule = css.find("p.attribution + p").expect("attribution sibling rule");
        assert!(css[rule..].starts_with("p.attribution + p {\n  text-indent: 0;"));
    }

    #[test]
    fn paragraphs_and_titles_are_escaped() {
        let chapters = vec![chapter("A & B <1>", "Unknown", &["x < y && \"z\"", "plain"])];
        let bytes = build_document(&info(), &chapters).to_bytes().expect("serializes");
        let html = read_entry(&bytes, "OEBPS/chapter-0001.xhtml");
        assert!(html.contains("<h1 class=\"first\">A &amp; B &lt;1&gt;</h1>"));
        assert!(html.contains("<p>x &lt; y &amp;&amp; &quot;z&quot;</p>"));
        assert!(html.contains("<p>plain</p>"));
        assert!(read_entry(&bytes, "OEBPS/nav.xhtml").contains("A &amp; B &lt;1&gt;"));
    }

    #[test]
    fn nav_page_can_be_left_out_of_reading_order() {
        let mut doc = build_document(&info(), &[chapter("One", "Unknown", &["a"])]);
        doc.include_nav_page = false;
        let bytes = doc.to_bytes().expect("serializes");
        let opf = read_entry(&bytes, "OEBPS/content.opf");
        assert!(!opf.contains("<itemref idref=\"nav\"/>"));
        assert!(opf.contains("properties=\"nav\""));
    }

    #[test]
    fn identical_input_serializes_to_identical_bytes() {
        let chapters = vec![
            chapter("One", "Nyx", &["Hello", "World"]),
            chapter("Two", "Unknown", &["Again"]),
        ];
        let first = build_document(&info(), &chapters).to_bytes().expect("serializes");
        let second = build_document(&info(), &chapters).to_bytes().expect("serializes");
        assert_eq!(first, second);
    }

    #[test]
    fn write_epub_overwrites_existing_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("novel_output.epub");
        std::fs::write(&path, b"stale")?;
        write_epub(&path, &info(), &[chapter("One", "Unknown", &["a"])], true)?;
        let bytes = std::fs::read(&path)?;
        assert!(read_entry(&bytes, "OEBPS/chapter-0001.xhtml").contains("One"));
        Ok(())
    }
}
