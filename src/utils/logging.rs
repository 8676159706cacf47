use crate::session::transcript::{ItemKind, Role, TranscriptItem};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Plain-text transcript log.
pub struct TranscriptLog {
    file_path: PathBuf,
}

impl TranscriptLog {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        TranscriptLog {
            file_path: file_path.into(),
        }
    }

    /// Replaces the log with the given transcript. The new contents land in a
    /// temp file next to the target and are renamed over it.
    pub fn rewrite(&self, items: &[TranscriptItem]) -> Result<(), Box<dyn std::error::Error>> {
        let parent = self
            .file_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut temp_file = NamedTempFile::new_in(parent)?;
        {
            let mut writer = BufWriter::with_capacity(64 * 1024, temp_file.as_file_mut());
            for item in items {
                write_item(&mut writer, item)?;
            }
            writer.flush()?;
        }
        temp_file.as_file_mut().sync_all()?;
        temp_file.persist(&self.file_path)?;
        Ok(())
    }
}

/// Renders an item the way it appears in the log, without the trailing
/// blank line.
pub fn format_item(item: &TranscriptItem) -> String {
    let mut rendered = match (item.kind, item.role) {
        (ItemKind::Breadcrumb, _) => format!("## {}", item.text),
        (ItemKind::Message, Role::User) => format!("You: {}", item.text),
        (ItemKind::Message, Role::Assistant) => item.text.clone(),
    };
    if let Some(verdict) = item.guardrail.as_ref().filter(|verdict| verdict.is_trip()) {
        rendered.push_str(&format!(
            "\n## Guardrail: {} ({})",
            verdict.category, verdict.rationale
        ));
    }
    rendered
}

fn write_item<W: Write>(writer: &mut W, item: &TranscriptItem) -> std::io::Result<()> {
    for line in format_item(item).lines() {
        writeln!(writer, "{line}")?;
    }
    writeln!(writer)
}
