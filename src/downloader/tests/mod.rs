//! Downloader tests: pool admission, retry outcomes, cancellation and full chapter runs.

mod admission;
