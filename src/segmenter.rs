use crate::error::Result;

/// Sentence marks checked in priority order; two-character marks first so a
/// mid-reply boundary wins over a bare trailing mark
const SENTENCE_MARKS: [&str; 6] = [". ", "? ", "! ", ".", "?", "!"];

/// Receives complete sentences as the segmenter recognizes them
pub trait SentenceSpeaker {
    fn speak_sentence(&mut self, sentence: &str) -> Result<()>;
}

/// How many sentence boundaries to flush per pushed fragment.
///
/// `FirstMatch` reproduces the upstream single-boundary-per-fragment
/// behavior: a fragment carrying two complete sentences leaves the second
/// buffered until the next push. `DrainAll` re-scans the remainder until no
/// boundary is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushPolicy {
    FirstMatch,
    #[default]
    DrainAll,
}

/// Incremental sentence segmenter for streamed assistant replies.
///
/// Fragments are appended to an internal buffer; whenever the buffer holds a
/// sentence boundary, everything up to and including the mark is flushed to
/// the speaker so synthesis can start before the reply finishes streaming.
pub struct ReplySegmenter {
    buffer: String,
    policy: FlushPolicy,
}

impl ReplySegmenter {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            buffer: String::new(),
            policy,
        }
    }

    /// Append one streamed fragment, flushing any completed sentence(s)
    pub fn push(&mut self, fragment: &str, speaker: &mut dyn SentenceSpeaker) -> Result<()> {
        self.buffer.push_str(fragment);

        loop {
            let Some(split) = self.find_boundary() else {
                break;
            };

            let sentence: String = self.buffer.drain(..split).collect();
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                speaker.speak_sentence(sentence)?;
            }

            if self.policy == FlushPolicy::FirstMatch {
                break;
            }
        }

        Ok(())
    }

    /// End-of-stream flush: emit a trailing fragment that never reached a
    /// terminal mark, so the last sentence of a reply is still heard
    pub fn finish(&mut self, speaker: &mut dyn SentenceSpeaker) -> Result<()> {
        let leftover = std::mem::take(&mut self.buffer);
        let leftover = leftover.trim();
        if !leftover.is_empty() {
            log::debug!("Flushing unterminated reply tail: '{}'", leftover);
            speaker.speak_sentence(leftover)?;
        }
        Ok(())
    }

    /// Text accumulated but not yet flushed
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Byte offset just past the first sentence mark, by mark priority
    fn find_boundary(&self) -> Option<usize> {
        for mark in SENTENCE_MARKS {
            if let Some(idx) = self.buffer.find(mark) {
                return Some(idx + mark.len());
            }
        }
        None
    }
}
