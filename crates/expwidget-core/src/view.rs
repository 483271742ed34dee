//! Render model and the surface that displays it.
//!
//! [`CreativeView::from_creative`] is pure; the [`RenderSurface`] owns the
//! DOM (or whatever stands in for it).

use crate::creative::{Creative, CreativeId};

/// Thumbnail background when the creative has no image.
pub const PLACEHOLDER_GRADIENT: &str = "linear-gradient(135deg, #38bdf8, #a78bfa)";
/// Subtitle when neither selling points nor a product name exist.
pub const DEFAULT_SUBTITLE: &str = "Tap to view details";
/// Call to action when the creative has none.
pub const DEFAULT_CTA: &str = "Learn more";

const SUBTITLE_POINTS: usize = 2;
const SUBTITLE_SEPARATOR: &str = " · ";

/// Thumbnail content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Thumbnail {
    /// Image source (remote URL or cached `data:` URL)
    Image(String),
    /// [`PLACEHOLDER_GRADIENT`]
    Gradient,
}

/// Display-ready creative.
#[derive(Debug, Clone, PartialEq)]
pub struct CreativeView {
    /// Canonical identifier
    pub creative_id: CreativeId,
    /// Headline
    pub title: String,
    /// Secondary line
    pub subtitle: String,
    /// Button label
    pub cta: String,
    /// Artwork
    pub thumbnail: Thumbnail,
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.trim().is_empty())
}

impl CreativeView {
    /// Build the view for `creative`.
    ///
    /// `cached_image` is a previously stored `data:` URL for the creative's
    /// image; it replaces the remote URL when present.
    #[must_use]
    pub fn from_creative(creative: &Creative, cached_image: Option<String>) -> Self {
        let title = non_blank(creative.title.as_ref())
            .or_else(|| non_blank(creative.product_name.as_ref()))
            .map_or_else(|| format!("Creative #{}", creative.id), str::to_string);

        let points: Vec<&str> = creative
            .selling_points
            .iter()
            .flatten()
            .map(String::as_str)
            .filter(|p| !p.trim().is_empty())
            .take(SUBTITLE_POINTS)
            .collect();
        let subtitle = if points.is_empty() {
            non_blank(creative.product_name.as_ref())
                .unwrap_or(DEFAULT_SUBTITLE)
                .to_string()
        } else {
            points.join(SUBTITLE_SEPARATOR)
        };

        let cta = non_blank(creative.cta_text.as_ref())
            .unwrap_or(DEFAULT_CTA)
            .to_string();

        let thumbnail = cached_image
            .or_else(|| non_blank(creative.image_url.as_ref()).map(str::to_string))
            .map_or(Thumbnail::Gradient, Thumbnail::Image);

        Self {
            creative_id: creative.id.clone(),
            title,
            subtitle,
            cta,
            thumbnail,
        }
    }
}

/// Status line shown instead of a creative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// Request in flight, nothing cached
    Assigning,
    /// The service assigned nothing; carries its message if it sent one
    NoCreative(Option<String>),
    /// Request failed with no fallback
    Error(String),
}

impl Status {
    /// Text shown to the user.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Assigning => "Assigning...".to_string(),
            Self::NoCreative(Some(message)) => message.clone(),
            Self::NoCreative(None) => "No creative assigned".to_string(),
            Self::Error(reason) => format!("Assignment error: {reason}"),
        }
    }
}

/// Handle to a rendered creative element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u64);

/// Display collaborator.
pub trait RenderSurface {
    /// Replace the card content with a status line.
    fn show_status(&mut self, status: &Status);

    /// Replace the card content with a creative; returns the element to observe.
    fn render_creative(&mut self, view: &CreativeView) -> ElementId;

    /// Open or close the panel.
    fn set_panel_open(&mut self, open: bool);

    /// Show the toast message.
    fn show_toast(&mut self, message: &str);

    /// Hide the toast.
    fn hide_toast(&mut self);

    /// Remove everything from the page.
    fn unmount(&mut self);
}
