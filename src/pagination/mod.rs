//! Pagination module
//!
//! Supports: Cursor, Offset, Page Number, Params Object, Last Record
//!
//! Each strategy reads the next page parameters from a response and reports
//! when pagination is complete. The fetch loop in `engine` drives them and
//! adds the cross-cutting stop rules (repeated cursor, boundary, page cap).

mod strategies;
mod types;

pub use strategies::{
    CursorPaginator, LastRecordPaginator, NoPaginator, OffsetPaginator, PageNumberPaginator,
    ParamsPaginator,
};
pub use types::{should_stop, NextPage, PaginationState, Paginator, StopCondition};
