use std::path::{Path, PathBuf};

use crate::config::OutputConfig;

/// Where one task run puts its artifacts:
/// `<base>/<root_dir_name>/<folder>/` holding the results sheet and daily logs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputLayout {
    pub folder: PathBuf,
    pub sheet_path: PathBuf,
}

impl OutputLayout {
    pub fn resolve(base_dir: &Path, output_name: Option<&str>, config: &OutputConfig) -> Self {
        let folder = base_dir
            .join(&config.root_dir_name)
            .join(folder_name(output_name, config));
        let sheet_path = folder.join(sheet_file_name(output_name, config));
        Self { folder, sheet_path }
    }
}

/// Text before the first `.`, lowercased, with the reserved marker removed.
pub fn folder_name(output_name: Option<&str>, config: &OutputConfig) -> String {
    let stem = output_name
        .and_then(|name| name.split('.').next())
        .unwrap_or_default();
    let derived = strip_marker(&stem.to_lowercase(), &config.reserved_marker);
    let derived = derived.trim();

    if derived.is_empty() {
        config.default_folder_name.clone()
    } else {
        derived.to_string()
    }
}

pub fn sheet_file_name(output_name: Option<&str>, config: &OutputConfig) -> String {
    let lowered = strip_marker(
        &output_name.unwrap_or_default().to_lowercase(),
        &config.reserved_marker,
    );
    let stem = match lowered.rsplit_once('.') {
        Some((stem, _extension)) => stem,
        None => lowered.as_str(),
    };
    let stem = stem.trim();

    if stem.is_empty() {
        format!("{}.csv", config.default_folder_name)
    } else {
        format!("{stem}.csv")
    }
}

fn strip_marker(text: &str, marker: &str) -> String {
    if marker.is_empty() {
        return text.to_string();
    }
    text.replace(&marker.to_lowercase(), "")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{OutputLayout, folder_name, sheet_file_name};
    use crate::config::OutputConfig;

    #[test]
    fn folder_name_strips_extension_case_and_marker() {
        let config = OutputConfig::default();
        assert_eq!(folder_name(Some("SchoolQuery.xlsx"), &config), "school");
        assert_eq!(folder_name(Some("Q3.report.xlsx"), &config), "q3");
    }

    #[test]
    fn folder_name_falls_back_when_nothing_is_left() {
        let config = OutputConfig::default();
        assert_eq!(folder_name(Some("QUERY.xlsx"), &config), "result");
        assert_eq!(folder_name(Some(".xlsx"), &config), "result");
        assert_eq!(folder_name(None, &config), "result");
    }

    #[test]
    fn sheet_keeps_dotted_stem_and_switches_to_csv() {
        let config = OutputConfig::default();
        assert_eq!(sheet_file_name(Some("Q3.report.xlsx"), &config), "q3.report.csv");
        assert_eq!(sheet_file_name(Some("query.xlsx"), &config), "result.csv");
    }

    #[test]
    fn layout_nests_under_root_dir() {
        let config = OutputConfig::default();
        let layout = OutputLayout::resolve(Path::new("/data"), Some("nara_query.xlsx"), &config);
        assert_eq!(layout.folder, Path::new("/data/excel_database/nara_"));
        assert_eq!(layout.sheet_path, Path::new("/data/excel_database/nara_/nara_.csv"));
    }
}
