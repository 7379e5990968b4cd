//! Index statistics overview.
//!
//! Per-collection document counts by indexing status plus the number of
//! chunks held in the index store. Used by `wiki-index stats` and printed
//! at the end of `wiki-index sync`.

use anyhow::Result;

use crate::service::{CollectionStats, WikiIndex};

/// Print a summary table for every collection.
pub async fn run_stats(index: &WikiIndex) -> Result<()> {
    let stats = index.stats().await?;
    if stats.is_empty() {
        println!("No collections.");
        return Ok(());
    }

    println!("Wiki Index Stats");
    println!("================");
    println!();
    print_table(&stats);

    let total_chunks: usize = stats.iter().map(|s| s.chunks).sum();
    let total_failed: usize = stats.iter().map(|s| s.failed).sum();
    println!();
    println!("  Chunks:  {}", total_chunks);
    if total_failed > 0 {
        println!("  Failed:  {} (see `wiki-index status`)", total_failed);
    }
    Ok(())
}

pub fn print_table(stats: &[CollectionStats]) {
    println!(
        "  {:<20} {:<12} {:>6} {:>9} {:>8} {:>8} {:>7} {:>8}",
        "COLLECTION", "MODEL", "DOCS", "UNINDEXED", "PENDING", "INDEXED", "FAILED", "CHUNKS"
    );
    for s in stats {
        println!(
            "  {:<20} {:<12} {:>6} {:>9} {:>8} {:>8} {:>7} {:>8}",
            s.name, s.embedding_model, s.documents, s.unindexed, s.pending, s.indexed, s.failed, s.chunks
        );
    }
}
