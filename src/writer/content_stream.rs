//! Content stream builder.
//!
//! Produces the operator text of a page content stream. Only the text and
//! state operators needed for overlays are supported.

use crate::writer::object_serializer::ObjectSerializer;
use crate::object::Object;

/// Operations that can be added to a content stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentStreamOp {
    /// Save graphics state (q)
    SaveState,
    /// Restore graphics state (Q)
    RestoreState,
    /// Begin text object (BT)
    BeginText,
    /// End text object (ET)
    EndText,
    /// Select a font resource and size (Tf)
    SetFont(String, f32),
    /// Move to the start of the next line, offset from the current one (Td)
    MoveText(f32, f32),
    /// Set fill color RGB (rg)
    SetFillColorRGB(f32, f32, f32),
    /// Show already-encoded text bytes (Tj)
    ShowText(Vec<u8>),
}

/// Builder for content stream bytes.
#[derive(Debug, Clone, Default)]
pub struct ContentStreamBuilder {
    ops: Vec<ContentStreamOp>,
}

impl ContentStreamBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation.
    pub fn op(&mut self, op: ContentStreamOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    /// `q`
    pub fn save_state(&mut self) -> &mut Self {
        self.op(ContentStreamOp::SaveState)
    }

    /// `Q`
    pub fn restore_state(&mut self) -> &mut Self {
        self.op(ContentStreamOp::RestoreState)
    }

    /// `BT`
    pub fn begin_text(&mut self) -> &mut Self {
        self.op(ContentStreamOp::BeginText)
    }

    /// `ET`
    pub fn end_text(&mut self) -> &mut Self {
        self.op(ContentStreamOp::EndText)
    }

    /// `/<resource> <size> Tf`
    pub fn set_font(&mut self, resource_name: &str, size: f32) -> &mut Self {
        self.op(ContentStreamOp::SetFont(resource_name.to_string(), size))
    }

    /// `<dx> <dy> Td`
    pub fn move_text(&mut self, dx: f32, dy: f32) -> &mut Self {
        self.op(ContentStreamOp::MoveText(dx, dy))
    }

    /// `<r> <g> <b> rg`
    pub fn set_fill_color(&mut self, r: f32, g: f32, b: f32) -> &mut Self {
        self.op(ContentStreamOp::SetFillColorRGB(r, g, b))
    }

    /// `(<text>) Tj`
    pub fn show_text(&mut self, encoded: Vec<u8>) -> &mut Self {
        self.op(ContentStreamOp::ShowText(encoded))
    }

    /// Operations added so far.
    pub fn ops(&self) -> &[ContentStreamOp] {
        &self.ops
    }

    /// Render the operators, one per line.
    pub fn build(&self) -> Vec<u8> {
        let serializer = ObjectSerializer::compact();
        let mut out = Vec::new();

        for op in &self.ops {
            match op {
                ContentStreamOp::SaveState => out.extend_from_slice(b"q"),
                ContentStreamOp::RestoreState => out.extend_from_slice(b"Q"),
                ContentStreamOp::BeginText => out.extend_from_slice(b"BT"),
                ContentStreamOp::EndText => out.extend_from_slice(b"ET"),
                ContentStreamOp::SetFont(name, size) => {
                    out.extend_from_slice(&serializer.serialize(&Object::name(name)));
                    out.extend_from_slice(format!(" {} Tf", fmt_num(*size)).as_bytes());
                },
                ContentStreamOp::MoveText(dx, dy) => {
                    out.extend_from_slice(format!("{} {} Td", fmt_num(*dx), fmt_num(*dy)).as_bytes());
                },
                ContentStreamOp::SetFillColorRGB(r, g, b) => {
                    out.extend_from_slice(
                        format!("{} {} {} rg", fmt_num(*r), fmt_num(*g), fmt_num(*b)).as_bytes(),
                    );
                },
                ContentStreamOp::ShowText(encoded) => {
                    out.extend_from_slice(&serializer.serialize(&Object::String(encoded.clone())));
                    out.extend_from_slice(b" Tj");
                },
            }
            out.push(b'\n');
        }

        out
    }
}

fn fmt_num(value: f32) -> String {
    String::from_utf8_lossy(&ObjectSerializer::compact().serialize(&Object::Real(value as f64)))
        .into_owned()
}
