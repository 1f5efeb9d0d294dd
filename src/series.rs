//! Series identity shared by every task of a run.

/// Identity of the series being harvested.
///
/// Both derived keys are pure functions of the display name and are computed
/// once at construction:
///
/// - `canonical_id` addresses the series on the remote origin
///   (`"vagabond"` → `"Vagabond"`, `"one piece"` → `"One-piece"`)
/// - `slug` names the series in local storage (`"One Piece"` → `"one_piece"`)
///
/// Fields are private so the keys can never drift from the display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRef {
    display_name: String,
    canonical_id: String,
    slug: String,
}

impl SeriesRef {
    pub fn new(display_name: impl Into<String>) -> Self {
        let display_name = display_name.into().trim().to_owned();
        let canonical_id = capitalize(&display_name).replace(' ', "-");
        let slug = display_name.to_lowercase().replace(' ', "_");

        Self {
            display_name,
            canonical_id,
            slug,
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Key used in every remote address (feed, chapter view, image).
    pub fn canonical_id(&self) -> &str {
        &self.canonical_id
    }

    /// Key used for local storage paths.
    pub fn slug(&self) -> &str {
        &self.slug
    }
}

impl std::fmt::Display for SeriesRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_name)
    }
}

/// First character upper-cased, the remainder lower-cased.
fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
