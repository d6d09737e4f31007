//! PaginationCursor
//!
//! Drives a list operation page by page. Each page is fetched with the
//! cursor taken from the previous page, so pages are strictly sequential.
//! The walk stops as soon as a page comes back with an empty cursor or with
//! no items; vendors disagree on which of the two they use to signal the
//! end.

use crate::dispatcher::Dispatcher;
use crate::params::ParameterMap;
use crate::service::{Operation, ServiceFamily};
use futures_util::Stream;
use serde::de::DeserializeOwned;
use skyport_cloud::{CloudError, Result};

/// A decoded page of a list operation
pub trait Paged: DeserializeOwned + Send + 'static {
    type Item;

    /// Continuation token reported by this page, if any
    fn next_cursor(&self) -> Option<&str>;

    fn into_items(self) -> Vec<Self::Item>;
}

/// Cursor state for one list call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub field_name: String,
    pub token: String,
    pub exhausted: bool,
}

impl Cursor {
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            token: String::new(),
            exhausted: false,
        }
    }

    /// Record the outcome of one page
    pub fn advance(&mut self, next: Option<&str>, page_len: usize) {
        let next = next.unwrap_or_default();
        if next.is_empty() || page_len == 0 {
            self.exhausted = true;
            self.token.clear();
        } else {
            self.token = next.to_string();
        }
    }
}

pub struct Paginator<'a, P> {
    dispatcher: &'a Dispatcher,
    family: ServiceFamily,
    region: String,
    op: Operation,
    params: ParameterMap,
    cursor: Cursor,
    page_size: Option<u32>,
    _page: std::marker::PhantomData<fn() -> P>,
}

impl<'a, P: Paged> Paginator<'a, P> {
    pub fn new(
        dispatcher: &'a Dispatcher,
        family: ServiceFamily,
        region: impl Into<String>,
        op: impl Into<Operation>,
        params: ParameterMap,
    ) -> Self {
        Self {
            dispatcher,
            family,
            region: region.into(),
            op: op.into(),
            params,
            cursor: Cursor::new(family.cursor_field()),
            page_size: Some(0),
            _page: std::marker::PhantomData,
        }
    }

    /// Override the request parameter carrying the cursor
    pub fn cursor_field(mut self, name: impl Into<String>) -> Self {
        self.cursor.field_name = name.into();
        self
    }

    /// Requested page size; zero or anything above the family maximum
    /// falls back to the maximum
    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    /// For operations that take no page size parameter
    pub fn without_page_size(mut self) -> Self {
        self.page_size = None;
        self
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor.exhausted
    }

    fn effective_page_size(&self) -> Option<u32> {
        let max = self.family.max_page_size();
        self.page_size
            .map(|size| if size == 0 || size > max { max } else { size })
    }

    /// Fetch the next page, or `None` once the listing is exhausted
    pub async fn next_page(&mut self) -> Result<Option<Vec<P::Item>>> {
        if self.cursor.exhausted {
            return Ok(None);
        }

        let mut params = self.params.clone();
        if let Some(size) = self.effective_page_size() {
            params.insert(self.family.page_size_field(), size.to_string());
        }
        if !self.cursor.token.is_empty() {
            params.insert(self.cursor.field_name.clone(), self.cursor.token.clone());
        }

        let page: P = self
            .dispatcher
            .call(self.family, &self.region, self.op.clone(), params)
            .await?;
        let next = page.next_cursor().map(str::to_string);
        let items = page.into_items();
        self.cursor.advance(next.as_deref(), items.len());
        tracing::debug!(
            "{} page: {} items, more: {}",
            self.op.name,
            items.len(),
            !self.cursor.exhausted
        );
        Ok(Some(items))
    }

    /// Walk every page and concatenate the items
    pub async fn collect_all(mut self) -> Result<Vec<P::Item>> {
        let mut all = Vec::new();
        while let Some(items) = self.next_page().await? {
            all.extend(items);
        }
        Ok(all)
    }

    /// Lazy stream of pages. Ends after the last page or the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<P::Item>>> + 'a
    where
        P::Item: 'a,
        P: 'a,
    {
        futures_util::stream::try_unfold(self, |mut paginator| async move {
            let page = paginator.next_page().await?;
            Ok::<_, CloudError>(page.map(|items| (items, paginator)))
        })
    }
}
