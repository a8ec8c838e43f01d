//! Parsing of the worker pinning specification.
//!
//! The value is a comma-separated list of items, where each item is either:
//!
//! * a single processor index (e.g. `6`)
//! * an inclusive range of processor indexes (e.g. `0:3` which is equivalent to `0,1,2,3`)
//! * an inclusive range with a stride in the middle (e.g. `8:2:16` which is equivalent to
//!   `8,10,12,14,16`)
//!
//! Unlike a Linux cpulist, the order of the items is significant and duplicates are kept: worker
//! `i` is pinned to the `i`-th processor index in the resolved list.
//!
//! ```
//! let pins = mbw::parse_affinity("0:3,6,7,8:2:16").unwrap();
//! assert_eq!(pins, vec![0, 1, 2, 3, 6, 7, 8, 10, 12, 14, 16]);
//! ```

use thiserror::Error;

/// Index of a logical processor, as understood by the operating system scheduler.
pub type ProcessorIndex = u32;

/// Processor indexes must fit in the affinity mask the kernel is handed.
const PROCESSOR_LIMIT: usize = libc::CPU_SETSIZE as usize;

/// Errors that can occur when parsing a pinning specification.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The specification (or one item of it) did not match the expected format.
    #[error("invalid affinity syntax: '{invalid_value}' is invalid: {problem}")]
    InvalidSyntax {
        /// The offending value. Either the entire specification or the item that failed.
        invalid_value: String,

        /// A human-readable description of the problem.
        problem: String,
    },
}

impl Error {
    fn new(invalid_value: impl Into<String>, problem: impl Into<String>) -> Self {
        Self::InvalidSyntax {
            invalid_value: invalid_value.into(),
            problem: problem.into(),
        }
    }
}

/// Parses a pinning specification into one processor index per worker, in worker order.
///
/// An empty item (e.g. from a trailing comma) contributes nothing.
pub fn parse_affinity(spec: &str) -> Result<Vec<ProcessorIndex>, Error> {
    if spec.is_empty() {
        return Err(Error::new(spec, "specification must not be empty"));
    }

    let mut processors = Vec::new();

    for item in spec.split(',') {
        processors.extend(parse_item(item)?);
    }

    Ok(processors)
}

fn parse_item(item: &str) -> Result<Vec<ProcessorIndex>, Error> {
    if item.is_empty() {
        return Ok(vec![]);
    }

    let fields = item
        .split(':')
        .map(|field| parse_index(item, field))
        .collect::<Result<Vec<_>, _>>()?;

    let (start, stride, end_inclusive) = match *fields.as_slice() {
        [single] => return Ok(vec![single]),
        [start, end_inclusive] => (start, 1, end_inclusive),
        // A zero stride would never advance, so it is read as "every processor".
        [start, stride, end_inclusive] => (start, stride.max(1), end_inclusive),
        _ => {
            return Err(Error::new(
                item,
                "expected INDEX, START:END or START:STRIDE:END",
            ));
        }
    };

    if start > end_inclusive {
        return Err(Error::new(item, "range start must be <= end"));
    }

    Ok((start..=end_inclusive)
        .step_by(usize::try_from(stride).unwrap_or(usize::MAX))
        .collect())
}

fn parse_index(item: &str, field: &str) -> Result<ProcessorIndex, Error> {
    // `u32::from_str` accepts a leading '+', which we do not want to accept here.
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::new(
            item,
            format!("'{field}' is not a non-negative integer"),
        ));
    }

    let index = field
        .parse::<ProcessorIndex>()
        .map_err(|inner| Error::new(item, format!("'{field}' is out of range: {inner}")))?;

    if usize::try_from(index)
        .ok()
        .is_none_or(|index| index >= PROCESSOR_LIMIT)
    {
        return Err(Error::new(
            item,
            format!(
                "'{field}' is beyond the highest supported processor index {}",
                PROCESSOR_LIMIT - 1
            ),
        ));
    }

    Ok(index)
}
