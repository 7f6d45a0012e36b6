//! Public request and response shapes.
//!
//! These are the JSON bodies a transport layer accepts and returns. They are
//! converted into [`ReadRequest`](crate::operation::ReadRequest)s before they
//! reach the pipeline and rendered back from
//! [`ReadResponse`](crate::operation::ReadResponse)s afterwards.

mod batch;
mod pk_read;

pub use batch::{BatchOpRequest, BatchOpResponse, BatchSubOp, BatchSubResponse};
pub use pk_read::{
    render_value, Filter, PkReadBody, PkReadParams, PkReadResponse, ReadColumn, RenderedValue,
};
