//! Deferred payloads of the `AppendedData` section.
//!
//! Writing appended data happens in two phases. While the document is assembled, each payload is
//! registered with [`Appendix::add`], which returns an [`OffsetToken`] standing in for the
//! payload's offset. [`Appendix::resolve`] then produces all payloads in registration order and
//! assigns offsets with a running counter, so the document can be rendered with final offsets
//! before the payloads are streamed.

use std::io::Write;

use crate::Error;

/// Placeholder for the offset of a registered payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OffsetToken(usize);

type Producer<'a> = Box<dyn FnOnce() -> Result<Vec<u8>, Error> + 'a>;
type Observer<'a> = Box<dyn FnMut(OffsetToken, u64) + 'a>;

/// Payloads registered for the appended data section of one document.
#[derive(Default)]
pub struct Appendix<'a> {
    producers: Vec<Producer<'a>>,
    observer: Option<Observer<'a>>,
}

impl<'a> Appendix<'a> {
    pub fn new() -> Self {
        Appendix {
            producers: Vec::new(),
            observer: None,
        }
    }

    /// Registers a payload that is produced when the appendix is resolved.
    ///
    /// The produced bytes must be fully encoded, including the data array header.
    pub fn add(&mut self, producer: impl FnOnce() -> Result<Vec<u8>, Error> + 'a) -> OffsetToken {
        self.producers.push(Box::new(producer));
        OffsetToken(self.producers.len() - 1)
    }

    /// Installs a callback receiving each token with its offset during [`resolve`].
    ///
    /// [`resolve`]: Appendix::resolve
    pub fn set_observer(&mut self, observer: impl FnMut(OffsetToken, u64) + 'a) {
        self.observer = Some(Box::new(observer));
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    /// Produces all payloads and assigns their offsets relative to the start of the section.
    pub fn resolve(self) -> Result<ResolvedAppendix, Error> {
        let Appendix {
            producers,
            mut observer,
        } = self;
        let mut offsets = Vec::with_capacity(producers.len());
        let mut payloads = Vec::with_capacity(producers.len());
        let mut offset = 0u64;
        for (i, producer) in producers.into_iter().enumerate() {
            if let Some(observer) = observer.as_mut() {
                observer(OffsetToken(i), offset);
            }
            let payload = producer()?;
            offsets.push(offset);
            offset += payload.len() as u64;
            payloads.push(payload);
        }
        log::debug!("resolved {} appended payloads, {} bytes", payloads.len(), offset);
        Ok(ResolvedAppendix { offsets, payloads })
    }
}

/// Appended payloads with known offsets.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedAppendix {
    offsets: Vec<u64>,
    payloads: Vec<Vec<u8>>,
}

impl ResolvedAppendix {
    pub fn offset(&self, token: OffsetToken) -> Option<u64> {
        self.offsets.get(token.0).copied()
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// Total number of bytes in the section, excluding the leading marker.
    pub fn total_len(&self) -> u64 {
        self.payloads.iter().map(|p| p.len() as u64).sum()
    }

    /// Writes all payloads back to back.
    pub fn stream_to<W: Write>(&self, out: &mut W) -> Result<(), Error> {
        for payload in &self.payloads {
            out.write_all(payload)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_contiguous() -> Result<(), Error> {
        let sizes = [5usize, 0, 12, 3];
        let mut appendix = Appendix::new();
        let tokens: Vec<_> = sizes
            .iter()
            .map(|&n| appendix.add(move || Ok(vec![1u8; n])))
            .collect();

        let resolved = appendix.resolve()?;
        let mut expected = 0u64;
        for (token, size) in tokens.iter().zip(sizes) {
            assert_eq!(resolved.offset(*token), Some(expected));
            expected += size as u64;
        }
        assert_eq!(resolved.total_len(), expected);
        assert!(resolved.offsets().windows(2).all(|w| w[0] <= w[1]));
        Ok(())
    }

    #[test]
    fn observer_sees_tokens_in_order() -> Result<(), Error> {
        let mut seen = Vec::new();
        {
            let mut appendix = Appendix::new();
            appendix.set_observer(|token, offset| seen.push((token, offset)));
            let a = appendix.add(|| Ok(vec![0; 4]));
            let b = appendix.add(|| Ok(vec![0; 8]));
            let c = appendix.add(|| Ok(vec![0; 1]));
            assert_eq!(appendix.len(), 3);
            let resolved = appendix.resolve()?;
            assert_eq!(resolved.offsets(), &[0, 4, 12]);
            assert_eq!((a, b, c), (OffsetToken(0), OffsetToken(1), OffsetToken(2)));
        }
        assert_eq!(
            seen,
            vec![(OffsetToken(0), 0), (OffsetToken(1), 4), (OffsetToken(2), 12)]
        );
        Ok(())
    }

    #[test]
    fn producer_errors_abort_resolution() {
        let mut appendix = Appendix::new();
        appendix.add(|| Ok(vec![1]));
        appendix.add(|| Err(Error::Encoding("broken".to_string())));
        assert!(matches!(appendix.resolve(), Err(Error::Encoding(_))));
    }

    #[test]
    fn streams_payloads_in_order() -> Result<(), Error> {
        let mut appendix = Appendix::new();
        appendix.add(|| Ok(b"ab".to_vec()));
        appendix.add(|| Ok(b"cde".to_vec()));
        let mut out = Vec::new();
        appendix.resolve()?.stream_to(&mut out)?;
        assert_eq!(out, b"abcde".to_vec());
        Ok(())
    }
}
