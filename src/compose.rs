use crate::{
    limits::MAX_EMOJI_IN_MESSAGE,
    platform::StickerSet,
    upload::{EmojiMatrix, PublishRequest, TileUploadMeta},
};

/// Picks the entries an outbound message renders, in display order.
///
/// A new pack shows its own matrix, fillers in place. An extended pack shows the tail of the
/// pack listing; fillers from earlier builds are not re-exposed there.
pub fn select_composition(
    matrix: &EmojiMatrix,
    pack: &StickerSet,
    request: &PublishRequest,
) -> Vec<TileUploadMeta> {
    if request.is_new_pack {
        return matrix.flatten().take(MAX_EMOJI_IN_MESSAGE).cloned().collect();
    }

    let start = pack.stickers.len().saturating_sub(MAX_EMOJI_IN_MESSAGE);
    pack.stickers[start..]
        .iter()
        .map(|s| TileUploadMeta {
            file_id: s.file_id.clone(),
            document_id: Some(s.custom_emoji_id.clone()),
            file_name: String::new(),
            is_filler: false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        limits::DEFAULT_COLUMNS,
        platform::{PackSticker, RetryPolicy, memory::MemoryPlatform},
        upload::{BuildOutcome, PackBuilder},
    };

    fn request(is_new_pack: bool) -> PublishRequest {
        PublishRequest {
            pack: "p".to_string(),
            title: "P".to_string(),
            is_new_pack,
            owner_id: 7,
            quality_level: 0,
            columns: 0,
            background: None,
        }
    }

    async fn built_matrix(tiles: usize, columns: u32) -> (EmojiMatrix, StickerSet) {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<_> = (0..tiles)
            .map(|i| {
                let p = dir.path().join(format!("t{i}.webm"));
                std::fs::write(&p, [0u8]).unwrap();
                p
            })
            .collect();
        let builder = PackBuilder::new(
            Arc::new(MemoryPlatform::new()),
            RetryPolicy::default(),
            "⭐️".to_string(),
        );
        let out = builder
            .build(&request(true), &paths, columns, Some(&[1u8][..]), &CancellationToken::new())
            .await
            .unwrap();
        match out {
            BuildOutcome::Published(b) => (b.matrix, b.set),
            BuildOutcome::NeedsQualityRetry => panic!("unexpected restart"),
        }
    }

    #[tokio::test]
    async fn new_pack_selection_keeps_fillers_in_place() {
        let (matrix, set) = built_matrix(12, 4).await;
        let sel = select_composition(&matrix, &set, &request(true));

        assert_eq!(sel.len(), 24);
        assert_eq!(sel.len() % DEFAULT_COLUMNS as usize, 0);
        assert!(sel[0].is_filler && sel[1].is_filler);
        assert!(!sel[2].is_filler);
        assert_eq!(sel, matrix.flatten().cloned().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn new_pack_selection_is_capped() {
        let (matrix, set) = built_matrix(120, 8).await;
        let sel = select_composition(&matrix, &set, &request(true));
        assert_eq!(sel.len(), MAX_EMOJI_IN_MESSAGE);
        assert_eq!(sel[99].document_id, matrix.flatten().nth(99).unwrap().document_id);
    }

    #[test]
    fn extended_pack_selection_takes_the_tail() {
        let set = StickerSet {
            name: "p".into(),
            title: "P".into(),
            stickers: (0..130)
                .map(|i| PackSticker {
                    file_id: format!("file-{i}"),
                    custom_emoji_id: format!("emoji-{i}"),
                })
                .collect(),
        };
        let sel = select_composition(&EmojiMatrix::default(), &set, &request(false));

        assert_eq!(sel.len(), MAX_EMOJI_IN_MESSAGE);
        assert_eq!(sel[0].document_id.as_deref(), Some("emoji-30"));
        assert_eq!(sel[99].document_id.as_deref(), Some("emoji-129"));
        assert!(sel.iter().all(|m| !m.is_filler));
    }
}
