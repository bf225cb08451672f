mod filter;
mod listing;

pub use filter::Filter;
pub use listing::{AlertListItem, AlertListQuery, ListingFilters};
