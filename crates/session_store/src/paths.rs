use std::path::{Path, PathBuf};

pub const DRAFT_DIR: [&str; 2] = [".chat_stream", "drafts"];

#[must_use]
pub fn draft_root(cwd: &Path) -> PathBuf {
    cwd.join(DRAFT_DIR[0]).join(DRAFT_DIR[1])
}

#[must_use]
pub fn sanitize_key_for_filename(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            ':' | '/' | '\\' | ' ' | '.' => '-',
            _ => c,
        })
        .collect()
}

#[must_use]
pub fn draft_file_name(draft_key: &str) -> String {
    format!("{}.json", sanitize_key_for_filename(draft_key))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{draft_file_name, draft_root};

    #[test]
    fn draft_files_live_under_hidden_dir() {
        assert_eq!(
            draft_root(Path::new("/work")),
            Path::new("/work/.chat_stream/drafts")
        );
        assert_eq!(draft_file_name("draft-new"), "draft-new.json");
        assert_eq!(draft_file_name("draft-../x"), "draft----x.json");
    }
}
