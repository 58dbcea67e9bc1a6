use crown_gen::{StrippedInputShape, StrippedOutputShape, fuse_input, fuse_output};
use crown_ir::{CannotProvide, InputNameLayout, InputShape, OutputNameLayout, OutputShape};

use crate::builder::{LayoutError, build_input_layout, build_output_layout};
use crate::config::{LayoutConfig, LayoutSchema};

/// Produces validated name layouts from configuration layers.
pub struct NameLayoutProvider<M> {
    schema: LayoutSchema<M>,
}

impl<M> NameLayoutProvider<M> {
    pub fn new<'a>(layers: impl IntoIterator<Item = &'a LayoutConfig<M>>) -> Self
    where
        M: 'a,
    {
        Self {
            schema: LayoutSchema::merge(layers),
        }
    }

    pub fn from_schema(schema: LayoutSchema<M>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &LayoutSchema<M> {
        &self.schema
    }

    pub fn input_layout(
        &self,
        model: &str,
        shape: &InputShape<M>,
    ) -> Result<InputNameLayout<M>, CannotProvide> {
        self.fused_input_layout(model, shape).map(|(layout, _)| layout)
    }

    /// The input layout together with the fields it uses.
    pub fn fused_input_layout<'s>(
        &self,
        model: &str,
        shape: &'s InputShape<M>,
    ) -> Result<(InputNameLayout<M>, StrippedInputShape<'s>), CannotProvide> {
        let layout = build_input_layout(shape, &self.schema).map_err(|err| reject(model, err))?;
        let used = fuse_input(shape, &layout).map_err(|err| reject(model, err.into()))?;
        Ok((layout, used))
    }

    pub fn output_layout(
        &self,
        model: &str,
        shape: &OutputShape<M>,
    ) -> Result<OutputNameLayout<M>, CannotProvide>
    where
        M: 'static,
    {
        self.fused_output_layout(model, shape).map(|(layout, _)| layout)
    }

    /// The output layout together with the fields it uses.
    pub fn fused_output_layout<'s>(
        &self,
        model: &str,
        shape: &'s OutputShape<M>,
    ) -> Result<(OutputNameLayout<M>, StrippedOutputShape<'s, M>), CannotProvide>
    where
        M: 'static,
    {
        let layout = build_output_layout(shape, &self.schema).map_err(|err| reject(model, err))?;
        let used = fuse_output(shape, &layout).map_err(|err| reject(model, err.into()))?;
        Ok((layout, used))
    }
}

fn reject(model: &str, err: LayoutError) -> CannotProvide {
    tracing::debug!(model, error = %err, "name layout rejected");
    CannotProvide::new(model, err)
}
