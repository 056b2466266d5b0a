//! Font pipeline: web font conversion and font-face declarations.
//!
//! | Task | Input | Output |
//! |---|---|---|
//! | [`convert_fonts`] | `<fonts>/*.ttf` | `<output>/fonts/<stem>.woff` and `.woff2` |
//! | [`generate_font_styles`] | font file names in `<fonts>` | missing lines appended to `<scss>/<styles.font_faces>` |
//!
//! Both encoders are in-crate: [`woff`] wraps zlib-compressed tables,
//! [`woff2`] puts all tables through one brotli stream.

pub mod sfnt;
pub mod style;
pub mod weight;
pub mod woff;
pub mod woff2;

use crate::artifact::{list_files, write_artifact, write_if_changed};
use crate::config::Project;
use crate::task::{TaskKind, TaskReport};
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FontError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed font: {0}")]
    Malformed(String),
}

/// Both web font encodings of one `.ttf`.
fn encode_both(ttf: &[u8]) -> Result<(Vec<u8>, Vec<u8>), FontError> {
    Ok((woff::encode(ttf)?, woff2::encode(ttf)?))
}

/// Convert every `.ttf` under the fonts root to WOFF and WOFF2.
///
/// A file that does not parse as a font fails alone.
pub fn convert_fonts(project: &Project) -> Result<TaskReport, FontError> {
    let layout = &project.layout;
    let out_dir = layout.output_fonts();
    let mut report = TaskReport::new(TaskKind::FontFiles);

    let sources = list_files(&layout.fonts, &["ttf"])?;
    let encoded: Vec<(PathBuf, Result<(Vec<u8>, Vec<u8>), FontError>)> = sources
        .into_par_iter()
        .map(|path| {
            let result = fs::read(&path)
                .map_err(FontError::from)
                .and_then(|bytes| encode_both(&bytes));
            (path, result)
        })
        .collect();

    for (path, result) in encoded {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match result {
            Ok((woff, woff2)) => {
                for (ext, bytes) in [("woff", woff), ("woff2", woff2)] {
                    let out = out_dir.join(format!("{stem}.{ext}"));
                    if write_if_changed(&out, &bytes)? {
                        report.written.push(out);
                    } else {
                        report.unchanged.push(out);
                    }
                }
            }
            Err(FontError::Io(e)) => return Err(FontError::Io(e)),
            Err(e) => report.fail(path, e.to_string()),
        }
    }
    Ok(report)
}

/// Append a font-face declaration for every font family not yet declared.
///
/// Listing or writing failures are fatal: a half-updated declarations file
/// would be worse than none.
pub fn generate_font_styles(project: &Project) -> Result<TaskReport, FontError> {
    let layout = &project.layout;
    let target = layout.scss.join(&project.config.styles.font_faces);
    let mut report = TaskReport::new(TaskKind::FontStyles);

    let files = list_files(&layout.fonts, style::FONT_EXTENSIONS)?;
    let families = style::families(files.iter().map(PathBuf::as_path));

    let existing = match fs::read_to_string(&target) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    match style::extend_declarations(&existing, &families, project.config.fonts.default_weight) {
        Some((content, added)) => {
            write_artifact(&target, content.as_bytes())?;
            tracing::debug!(families = ?added, "declared fonts");
            report.summary = Some(format!("{} font families declared", added.len()));
            report.written.push(target);
        }
        None => {
            report.unchanged.push(target);
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ProjectFixture, default_sfnt};

    #[test]
    fn convert_fonts_writes_both_formats() {
        let fixture = ProjectFixture::new();
        fixture.write_bytes("src/fonts/Roboto-Bold.ttf", &default_sfnt());
        fixture.write_bytes("src/fonts/readme.txt", b"not a font");

        let report = convert_fonts(&fixture.project()).unwrap();
        assert!(report.is_success());
        assert_eq!(report.written.len(), 2);
        assert_eq!(&fixture.read_bytes("build/fonts/Roboto-Bold.woff")[..4], b"wOFF");
        assert_eq!(&fixture.read_bytes("build/fonts/Roboto-Bold.woff2")[..4], b"wOF2");
    }

    #[test]
    fn convert_fonts_scopes_malformed_files() {
        let fixture = ProjectFixture::new();
        fixture.write_bytes("src/fonts/Broken.ttf", b"definitely not truetype");
        fixture.write_bytes("src/fonts/Good.ttf", &default_sfnt());

        let report = convert_fonts(&fixture.project()).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].path.ends_with("Broken.ttf"));
        assert!(fixture.exists("build/fonts/Good.woff2"));
        assert!(!fixture.exists("build/fonts/Broken.woff"));
    }

    #[test]
    fn convert_fonts_is_idempotent() {
        let fixture = ProjectFixture::new();
        fixture.write_bytes("src/fonts/A.ttf", &default_sfnt());
        let project = fixture.project();
        convert_fonts(&project).unwrap();
        let again = convert_fonts(&project).unwrap();
        assert!(again.written.is_empty());
        assert_eq!(again.unchanged.len(), 2);
    }

    #[test]
    fn font_styles_append_once_per_family() {
        let fixture = ProjectFixture::new();
        fixture.write_bytes("src/fonts/Inter-SemiBold.ttf", b"");
        fixture.write_bytes("src/fonts/Inter-SemiBold.woff", b"");
        fixture.write_bytes("src/fonts/Lato.ttf", b"");
        fixture.write("src/scss/_fonts.scss", "// fonts\n");
        let project = fixture.project();

        let first = generate_font_styles(&project).unwrap();
        assert_eq!(first.written.len(), 1);
        let expected = "// fonts\n\
            @include font-face(\"Inter-SemiBold\", \"Inter-SemiBold\", 600);\n\
            @include font-face(\"Lato\", \"Lato\", 400);\n";
        assert_eq!(fixture.read("src/scss/_fonts.scss"), expected);

        let second = generate_font_styles(&project).unwrap();
        assert!(second.written.is_empty());
        assert_eq!(fixture.read("src/scss/_fonts.scss"), expected);
    }

    #[test]
    fn font_styles_create_the_file_when_missing() {
        let fixture = ProjectFixture::new();
        fixture.write_bytes("src/fonts/Mono-Thin.ttf", b"");
        generate_font_styles(&fixture.project()).unwrap();
        assert_eq!(
            fixture.read("src/scss/_fonts.scss"),
            "@include font-face(\"Mono-Thin\", \"Mono-Thin\", 100);\n"
        );
    }

    #[test]
    fn font_styles_ignore_non_font_files() {
        let fixture = ProjectFixture::new();
        fixture.write_bytes("src/fonts/.DS_Store", b"");
        fixture.write_bytes("src/fonts/LICENSE.txt", b"");
        let report = generate_font_styles(&fixture.project()).unwrap();
        assert!(report.written.is_empty());
        assert!(!fixture.exists("src/scss/_fonts.scss"));
    }

    #[test]
    fn font_styles_use_configured_default_weight() {
        let fixture = ProjectFixture::new();
        fixture.write_bytes("src/fonts/Display.ttf", b"");
        let project = fixture.project_with(|c| c.fonts.default_weight = 500);
        generate_font_styles(&project).unwrap();
        assert!(fixture.read("src/scss/_fonts.scss").contains("\"Display\", 500);"));
    }
}
