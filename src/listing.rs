//! Paginated directory listings.
//!
//! [`list_pages`] turns the store's marker-based listing into a lazy stream
//! of pages. Nothing is fetched until the stream is polled, every poll fetches
//! at most one page, and a fresh call starts over from the beginning. The
//! continuation marker never leaves this module.
//!
//! A truncated page must carry a marker that sorts strictly after the
//! previous one. Anything else would loop forever, so it is reported as an
//! internal-consistency error instead.
//!
//! Page fetch failures are not retried.

use crate::error::{Result, SyncError};
use crate::store::{ListPage, ObjectStore, RemoteObject};
use futures::{Stream, TryStreamExt, stream};
use tracing::debug;

/// Delimiter used for directory-style listings.
pub const DELIMITER: &str = "/";

/// One directory level: the objects directly under a prefix and the
/// sub-prefixes one level down (full keys, ending in `/`).
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub objects: Vec<RemoteObject>,
    pub sub_prefixes: Vec<String>,
}

enum Cursor {
    Start,
    After(String),
    Done,
}

/// Stream the pages of a listing of `prefix`.
pub fn list_pages<'a>(
    store: &'a dyn ObjectStore,
    prefix: &'a str,
    delimiter: Option<&'a str>,
) -> impl Stream<Item = Result<ListPage>> + Send + 'a {
    stream::try_unfold(Cursor::Start, move |cursor| async move {
        let marker = match cursor {
            Cursor::Done => return Ok(None),
            Cursor::Start => None,
            Cursor::After(marker) => Some(marker),
        };
        let page = store
            .list_page(prefix, delimiter, marker.as_deref())
            .await?;
        debug!(
            prefix,
            objects = page.objects.len(),
            prefixes = page.common_prefixes.len(),
            truncated = page.is_truncated,
            "Listed page"
        );

        let next = if !page.is_truncated {
            Cursor::Done
        } else {
            match (&page.next_marker, &marker) {
                (None, _) => {
                    return Err(SyncError::Consistency(format!(
                        "listing of '{prefix}' was truncated without a continuation marker"
                    )));
                }
                (Some(next), Some(previous)) if next <= previous => {
                    return Err(SyncError::Consistency(format!(
                        "listing of '{prefix}' did not advance past marker '{previous}'"
                    )));
                }
                (Some(next), _) => Cursor::After(next.clone()),
            }
        };
        Ok::<_, SyncError>(Some((page, next)))
    })
}

/// List one directory level under `prefix`, concatenating every page.
///
/// A placeholder object whose key equals `prefix` itself (an empty "folder"
/// marker some tools create) is dropped.
pub async fn list_directory(store: &dyn ObjectStore, prefix: &str) -> Result<Listing> {
    list_pages(store, prefix, Some(DELIMITER))
        .try_fold(Listing::default(), |mut listing, page| async move {
            listing
                .objects
                .extend(page.objects.into_iter().filter(|o| o.key != prefix));
            listing.sub_prefixes.extend(page.common_prefixes);
            Ok(listing)
        })
        .await
}
