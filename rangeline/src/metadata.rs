//! Resource size and per-response length from response fields.

use thiserror::Error;

use crate::session::HeaderBlock;

/// Two `content-range` segments announced different totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("content-range total {conflicting} disagrees with {first}")]
pub(crate) struct TotalMismatch {
    pub first: u64,
    pub conflicting: u64,
}

/// Total resource size announced by `content-range` values.
///
/// Each value may hold several `\0`-separated segments shaped
/// `<unit> <start>-<end>/<total>`. Segments that are not `x/y` shaped and
/// totals that are not a number (`*`) carry no size and are skipped. Every
/// numeric total must agree with the first one.
pub(crate) fn content_range_total<'a>(
    values: impl IntoIterator<Item = &'a str>,
) -> Result<Option<u64>, TotalMismatch> {
    let mut total = None;
    for segment in values.into_iter().flat_map(|v| v.split('\0')) {
        let mut parts = segment.split('/');
        let (Some(_), Some(t), None) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let Ok(t) = t.trim().parse::<u64>() else {
            continue;
        };
        match total {
            None => total = Some(t),
            Some(first) if first != t => {
                return Err(TotalMismatch {
                    first,
                    conflicting: t,
                });
            }
            Some(_) => {}
        }
    }
    Ok(total)
}

/// Body length of this response.
pub(crate) fn content_length(headers: &HeaderBlock) -> Option<u64> {
    headers
        .get("content-length")
        .and_then(|v| v.trim().parse().ok())
}

/// Size of the whole resource.
///
/// `content-range` wins when present. Without it the response is taken to
/// be the whole resource, so `content-length` stands in.
pub(crate) fn resource_size(headers: &HeaderBlock) -> Result<Option<u64>, TotalMismatch> {
    if headers.get("content-range").is_some() {
        return content_range_total(headers.get_all("content-range"));
    }
    Ok(content_length(headers))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(fields: &[(&str, &str)]) -> HeaderBlock {
        fields.iter().copied().collect()
    }

    #[test]
    fn agreeing_segments() {
        assert_eq!(
            content_range_total(["bytes 0-99/1000\0bytes 100-199/1000"]),
            Ok(Some(1000))
        );
        assert_eq!(
            content_range_total(["bytes 0-99/1000", "bytes 100-199/1000"]),
            Ok(Some(1000))
        );
    }

    #[test]
    fn disagreeing_segments_keep_first() {
        assert_eq!(
            content_range_total(["bytes 0-99/1000\0bytes 100-199/2000"]),
            Err(TotalMismatch {
                first: 1000,
                conflicting: 2000
            })
        );
    }

    #[test]
    fn unusable_segments_are_skipped() {
        assert_eq!(content_range_total(["bytes 0-99/*"]), Ok(None));
        assert_eq!(content_range_total(["garbage\0bytes 0-9/10"]), Ok(Some(10)));
        assert_eq!(content_range_total(["a/b/c"]), Ok(None));
        assert_eq!(content_range_total([""]), Ok(None));
    }

    #[test]
    fn content_range_preferred_over_length() {
        let h = block(&[("content-length", "65536"), ("content-range", "bytes 0-65535/1048576")]);
        assert_eq!(resource_size(&h), Ok(Some(1_048_576)));
        assert_eq!(content_length(&h), Some(65536));
    }

    #[test]
    fn length_only_is_the_whole_resource() {
        let h = block(&[("content-length", " 4096 ")]);
        assert_eq!(resource_size(&h), Ok(Some(4096)));
    }

    #[test]
    fn nothing_known() {
        assert_eq!(resource_size(&HeaderBlock::new()), Ok(None));
        assert_eq!(content_length(&block(&[("content-length", "lots")])), None);
    }
}
