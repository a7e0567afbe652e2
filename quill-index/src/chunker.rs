use crate::config::IndexerConfig;

/// Chunk text plus its 1-indexed inclusive line range; tokens and
/// embeddings are attached by the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub text: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// Split file content into chunks. Languages with brace-delimited or
/// def/class structure get block-aligned chunks; everything else falls
/// back to overlapping character windows anchored on line boundaries.
/// The per-file cap bounds the chunk count either way.
pub fn chunk_content(content: &str, extension: Option<&str>, config: &IndexerConfig) -> Vec<ChunkDraft> {
    if content.trim().is_empty() {
        return Vec::new();
    }
    let mut chunks = if supports_blocks(extension) {
        let blocks = split_blocks(content, extension);
        coalesce_blocks(blocks, config)
    } else {
        window_lines(content, config)
    };
    if chunks.is_empty() {
        chunks = window_lines(content, config);
    }
    chunks.truncate(config.max_chunks_per_file);
    chunks
}

fn supports_blocks(extension: Option<&str>) -> bool {
    matches!(
        extension,
        Some("rs" | "go" | "java" | "c" | "cc" | "cpp" | "h" | "hpp" | "cs" | "js" | "jsx" | "ts" | "tsx" | "kt" | "scala" | "swift" | "py")
    )
}

fn is_block_start(trimmed: &str, extension: Option<&str>) -> bool {
    if matches!(extension, Some("py")) {
        return trimmed.starts_with("def ")
            || trimmed.starts_with("async def ")
            || trimmed.starts_with("class ");
    }
    const STARTERS: &[&str] = &[
        "fn ",
        "pub fn ",
        "pub(crate) fn ",
        "async fn ",
        "pub async fn ",
        "struct ",
        "pub struct ",
        "enum ",
        "pub enum ",
        "trait ",
        "pub trait ",
        "impl ",
        "impl<",
        "func ",
        "function ",
        "async function ",
        "export function ",
        "export async function ",
        "class ",
        "export class ",
        "interface ",
        "export interface ",
        "type ",
        "export type ",
    ];
    STARTERS.iter().any(|starter| trimmed.starts_with(starter))
}

struct Block {
    start_line: usize,
    end_line: usize,
    text: String,
}

/// Declaration-anchored block splitter with brace tracking, so a block
/// ends when its outermost brace closes rather than at the next blank
/// line.
fn split_blocks(content: &str, extension: Option<&str>) -> Vec<Block> {
    let lines: Vec<&str> = content.lines().collect();
    let mut blocks = Vec::new();
    let mut current: Option<Block> = None;
    let mut depth: i32 = 0;

    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if is_block_start(trimmed, extension) && depth == 0 {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            current = Some(Block {
                start_line: idx + 1,
                end_line: idx + 1,
                text: line.to_string(),
            });
        } else if let Some(block) = current.as_mut() {
            block.text.push('\n');
            block.text.push_str(line);
            block.end_line = idx + 1;
        }

        for ch in line.chars() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth = (depth - 1).max(0);
                    if depth == 0
                        && let Some(block) = current.take()
                    {
                        blocks.push(block);
                    }
                }
                _ => {}
            }
        }

        if trimmed.is_empty()
            && depth == 0
            && let Some(block) = current.take()
        {
            blocks.push(block);
        }
    }
    if let Some(block) = current {
        blocks.push(block);
    }
    blocks
}

/// Merge small adjacent blocks up to the chunk size and split oversized
/// ones through the window fallback so chunk sizes stay comparable
/// across strategies.
fn coalesce_blocks(blocks: Vec<Block>, config: &IndexerConfig) -> Vec<ChunkDraft> {
    let mut chunks: Vec<ChunkDraft> = Vec::new();
    for block in blocks {
        if block.text.len() > config.chunk_chars * 2 {
            for window in window_lines(&block.text, config) {
                chunks.push(ChunkDraft {
                    text: window.text,
                    start_line: block.start_line as u32 + window.start_line - 1,
                    end_line: block.start_line as u32 + window.end_line - 1,
                });
            }
            continue;
        }
        match chunks.last_mut() {
            Some(last)
                if last.text.len() + block.text.len() < config.chunk_chars
                    && block.start_line as u32 >= last.end_line =>
            {
                last.text.push('\n');
                last.text.push_str(&block.text);
                last.end_line = block.end_line as u32;
            }
            _ => chunks.push(ChunkDraft {
                text: block.text,
                start_line: block.start_line as u32,
                end_line: block.end_line as u32,
            }),
        }
    }
    chunks
}

/// Overlapping character windows (~chunk_chars with ~overlap back-off)
/// snapped to line boundaries.
fn window_lines(content: &str, config: &IndexerConfig) -> Vec<ChunkDraft> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < lines.len() {
        let mut end = start;
        let mut size = 0usize;
        while end < lines.len() && size < config.chunk_chars {
            size += lines[end].len() + 1;
            end += 1;
        }
        let text = lines[start..end].join("\n");
        chunks.push(ChunkDraft {
            text,
            start_line: (start + 1) as u32,
            end_line: end as u32,
        });
        if end >= lines.len() {
            break;
        }
        // Back up enough lines to cover the overlap budget.
        let mut overlap = 0usize;
        let mut next_start = end;
        while next_start > start + 1 && overlap < config.chunk_overlap_chars {
            next_start -= 1;
            overlap += lines[next_start].len() + 1;
        }
        start = next_start.max(start + 1);
    }
    chunks
}
