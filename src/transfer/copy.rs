//! Graph copy between content stores

use crate::digest::DigestUtils;
use crate::error::Result;
use crate::logging::Logger;
use crate::oci::{Descriptor, successors};
use crate::store::ContentStore;
use std::collections::HashSet;

/// Running totals, logged once the copy finishes
#[derive(Debug, Default)]
struct CopyStats {
    copied: usize,
    skipped: usize,
    bytes: u64,
}

struct GraphCopy<'a> {
    src: &'a dyn ContentStore,
    dst: &'a dyn ContentStore,
    logger: &'a Logger,
    visited: HashSet<String>,
    stats: CopyStats,
}

/// Copy everything reachable from `src_ref` in `src` into `dst`, tagging the root as `dst_ref`
///
/// Children are stored before their parents; nodes already present at the
/// destination are skipped along with everything beneath them. Every fetched
/// node is checked against its descriptor before it is stored.
pub async fn copy(
    src: &dyn ContentStore,
    src_ref: &str,
    dst: &dyn ContentStore,
    dst_ref: &str,
    logger: &Logger,
) -> Result<Descriptor> {
    let root = src.resolve(src_ref).await?;
    logger.detail(&format!(
        "Copying {} ({}) as {}",
        src_ref,
        DigestUtils::format_digest_short(&root.digest),
        dst_ref
    ));

    let mut graph = GraphCopy {
        src,
        dst,
        logger,
        visited: HashSet::new(),
        stats: CopyStats::default(),
    };
    graph.copy_node(&root, Some(dst_ref)).await?;

    logger.info(&format!(
        "Copied {} objects ({}), {} already present",
        graph.stats.copied,
        logger.format_size(graph.stats.bytes),
        graph.stats.skipped
    ));
    Ok(root)
}

impl GraphCopy<'_> {
    async fn copy_node(&mut self, desc: &Descriptor, reference: Option<&str>) -> Result<()> {
        if !self.visited.insert(desc.digest.clone()) {
            return Ok(());
        }

        if self.dst.exists(desc).await? {
            self.stats.skipped += 1;
            self.logger.detail(&format!(
                "Skipping {}: already exists",
                DigestUtils::format_digest_short(&desc.digest)
            ));
            if let Some(reference) = reference {
                self.dst.tag(desc, reference).await?;
            }
            return Ok(());
        }

        let content = self.src.fetch(desc).await?;
        DigestUtils::verify_descriptor(desc, &content)?;

        for child in successors(desc, &content)? {
            Box::pin(self.copy_node(&child, None)).await?;
        }

        match desc.title() {
            Some(title) => self.logger.step(&format!(
                "Copying {} ({})",
                title,
                self.logger.format_size(desc.size)
            )),
            None => self.logger.detail(&format!(
                "Copying {} {} ({})",
                desc.media_type,
                DigestUtils::format_digest_short(&desc.digest),
                self.logger.format_size(desc.size)
            )),
        }

        self.stats.copied += 1;
        self.stats.bytes += desc.size;
        match reference {
            Some(reference) => self.dst.push_reference(desc, content, reference).await,
            None => self.dst.push(desc, content).await,
        }
    }
}
