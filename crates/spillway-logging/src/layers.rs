//! Custom tracing layers for Spillway

use tracing::{Subscriber, span};
use tracing_subscriber::{
    layer::{Context, Layer},
    registry::LookupSpan,
};

use crate::context::{InstanceContext, InstanceContextGuard};

/// Layer that attaches the instance context to every new span
///
/// By default the context is read from the active [`InstanceContextGuard`]
/// when each span opens. A layer built with [`with_context`](Self::with_context)
/// always attaches the same context.
#[derive(Debug, Default)]
pub struct InstanceContextLayer {
    fixed: Option<InstanceContext>,
}

impl InstanceContextLayer {
    pub fn new() -> Self {
        Self { fixed: None }
    }

    pub fn with_context(context: InstanceContext) -> Self {
        Self {
            fixed: Some(context),
        }
    }

    fn context(&self) -> Option<InstanceContext> {
        self.fixed.clone().or_else(InstanceContextGuard::current)
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct InstanceContextExtension {
    pub data: InstanceContext,
}

impl<S> Layer<S> for InstanceContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id)
            && let Some(data) = self.context()
        {
            span.extensions_mut()
                .insert(InstanceContextExtension { data });
        }
    }
}

/// Read the instance context recorded on a span, if any
pub fn span_instance_context<S>(subscriber: &S, id: &span::Id) -> Option<InstanceContext>
where
    S: for<'lookup> LookupSpan<'lookup>,
{
    let span = subscriber.span(id)?;
    let extensions = span.extensions();
    extensions
        .get::<InstanceContextExtension>()
        .map(|ext| ext.data.clone())
}
