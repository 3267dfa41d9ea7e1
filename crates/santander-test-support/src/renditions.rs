//! Sample catalog renditions.

use santander_ops::{RenditionRef, RenditionType};

/// Sample image payload starting with the PNG signature.
pub const PIXEL_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

/// Image rendition named `name` carrying [`PIXEL_PNG`].
#[must_use]
pub fn image(name: &str) -> RenditionRef {
    RenditionRef::image(name, PIXEL_PNG.to_vec())
}

/// Two image renditions, `A` and `B`.
#[must_use]
pub fn pair() -> Vec<RenditionRef> {
    vec![image("A"), image("B")]
}

/// One rendition of each content kind.
#[must_use]
pub fn mixed() -> Vec<RenditionRef> {
    vec![
        image("AppIcon"),
        RenditionRef::color("AccentColor", 0.0, 0.478, 1.0, 1.0),
        RenditionRef::raw(
            "Glyph",
            RenditionType::Svg,
            b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>".to_vec(),
            Some("svg".to_string()),
        ),
    ]
}
