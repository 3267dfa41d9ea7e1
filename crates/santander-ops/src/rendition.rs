//! Self-contained rendition snapshots captured from a decoded asset catalog.

use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};

/// Category reported by the catalog decoder for a rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenditionType {
    /// Bitmap image.
    Image,
    /// Application or document icon.
    Icon,
    /// Named color.
    Color,
    /// Vector PDF artwork.
    Pdf,
    /// Vector SVG artwork.
    Svg,
    /// Opaque data blob.
    RawData,
    /// Any type the decoder does not classify.
    Other,
}

impl RenditionType {
    /// Stable label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Icon => "icon",
            Self::Color => "color",
            Self::Pdf => "pdf",
            Self::Svg => "svg",
            Self::RawData => "raw_data",
            Self::Other => "other",
        }
    }

    /// Whether the catalog editor can rewrite renditions of this type.
    #[must_use]
    pub const fn is_editable(self) -> bool {
        matches!(self, Self::Image | Self::Icon)
    }
}

/// Payload of a rendition, detached from the catalog it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenditionContent {
    /// Encoded PNG image bytes.
    Image {
        /// PNG bytes, base64 on the wire.
        #[serde(with = "crate::base64_bytes")]
        data: Vec<u8>,
    },
    /// Color components in the `0.0..=1.0` range. Components must be finite:
    /// JSON has no NaN or infinity, so encoding fails for them.
    Color {
        /// Red component.
        #[serde(serialize_with = "finite_component")]
        red: f64,
        /// Green component.
        #[serde(serialize_with = "finite_component")]
        green: f64,
        /// Blue component.
        #[serde(serialize_with = "finite_component")]
        blue: f64,
        /// Alpha component.
        #[serde(serialize_with = "finite_component")]
        alpha: f64,
    },
    /// Arbitrary bytes written verbatim.
    Raw {
        /// Raw bytes, base64 on the wire.
        #[serde(with = "crate::base64_bytes")]
        data: Vec<u8>,
        /// File extension without the leading dot.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extension: Option<String>,
    },
}

// serde hands fields over by reference.
#[allow(clippy::trivially_copy_pass_by_ref)]
fn finite_component<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else {
        Err(S::Error::custom(format!(
            "color component {value} is not finite"
        )))
    }
}

/// One rendition to be written by an extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenditionRef {
    /// Rendition name as shown by the catalog decoder.
    pub name: String,
    /// Decoder classification.
    pub rendition_type: RenditionType,
    /// Whether the rendition was editable in the source catalog.
    #[serde(default)]
    pub editable: bool,
    /// Detached payload.
    pub content: RenditionContent,
}

impl RenditionRef {
    /// Image rendition carrying encoded PNG bytes.
    #[must_use]
    pub fn image(name: impl Into<String>, png: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            rendition_type: RenditionType::Image,
            editable: RenditionType::Image.is_editable(),
            content: RenditionContent::Image { data: png },
        }
    }

    /// Color rendition. Non-finite components are accepted here but cannot
    /// be encoded.
    #[must_use]
    pub fn color(name: impl Into<String>, red: f64, green: f64, blue: f64, alpha: f64) -> Self {
        Self {
            name: name.into(),
            rendition_type: RenditionType::Color,
            editable: false,
            content: RenditionContent::Color {
                red,
                green,
                blue,
                alpha,
            },
        }
    }

    /// Opaque rendition written with an optional extension.
    #[must_use]
    pub fn raw(
        name: impl Into<String>,
        rendition_type: RenditionType,
        data: Vec<u8>,
        extension: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            rendition_type,
            editable: rendition_type.is_editable(),
            content: RenditionContent::Raw { data, extension },
        }
    }

    /// Name of the file this rendition produces inside the destination.
    #[must_use]
    pub fn file_name(&self) -> String {
        match &self.content {
            RenditionContent::Image { .. } => format!("{}.png", self.name),
            RenditionContent::Color { .. } => format!("{}.json", self.name),
            RenditionContent::Raw {
                extension: Some(extension),
                ..
            } => format!("{}.{extension}", self.name),
            RenditionContent::Raw {
                extension: None, ..
            } => self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_follow_content_kind() {
        assert_eq!(RenditionRef::image("AppIcon", vec![1]).file_name(), "AppIcon.png");
        assert_eq!(
            RenditionRef::color("Accent", 0.1, 0.2, 0.3, 1.0).file_name(),
            "Accent.json"
        );
        assert_eq!(
            RenditionRef::raw("Glyph", RenditionType::Pdf, vec![], Some("pdf".into())).file_name(),
            "Glyph.pdf"
        );
        assert_eq!(
            RenditionRef::raw("Blob", RenditionType::RawData, vec![], None).file_name(),
            "Blob"
        );
    }

    #[test]
    fn only_bitmaps_are_editable() {
        assert!(RenditionType::Image.is_editable());
        assert!(RenditionType::Icon.is_editable());
        assert!(!RenditionType::Color.is_editable());
        assert!(!RenditionType::Svg.is_editable());
    }

    #[test]
    fn non_finite_color_components_fail_to_encode() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let tint = RenditionRef::color("Tint", 0.5, bad, 0.5, 1.0);
            assert!(serde_json::to_vec(&tint).is_err());
        }
        assert!(serde_json::to_vec(&RenditionRef::color("Tint", 0.5, 0.5, 0.5, 1.0)).is_ok());
    }

    #[test]
    fn image_payload_is_base64_on_the_wire() -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(RenditionRef::image("A", vec![0x89, b'P', b'N', b'G']))?;
        assert_eq!(value["content"]["kind"], "image");
        assert_eq!(value["content"]["data"], "iVBORw==");
        Ok(())
    }
}
