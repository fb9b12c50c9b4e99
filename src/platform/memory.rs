use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use super::{InputSticker, PackSticker, PlatformError, StickerPlatform, StickerSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlatformCall {
    Upload,
    Create,
    Extend,
    Fetch,
}

#[derive(Debug, Default)]
struct State {
    sets: HashMap<String, StickerSet>,
    next_file: u64,
    next_emoji: u64,
    calls: Vec<PlatformCall>,
    uploaded_names: Vec<String>,
    faults: HashMap<PlatformCall, VecDeque<PlatformError>>,
}

/// In-process platform that keeps packs in memory.
///
/// Used for dry runs and tests. Faults queued with [`MemoryPlatform::fail_next`] are returned
/// by the next calls of that kind, in order, before the call takes effect.
#[derive(Debug, Default)]
pub struct MemoryPlatform {
    state: Mutex<State>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an existing pack with `count` stickers.
    pub fn with_pack(self, name: &str, count: usize) -> Self {
        {
            let mut st = self.lock();
            let mut stickers = Vec::with_capacity(count);
            for _ in 0..count {
                let file_id = next_id(&mut st.next_file, "file");
                let custom_emoji_id = next_id(&mut st.next_emoji, "emoji");
                stickers.push(PackSticker {
                    file_id,
                    custom_emoji_id,
                });
            }
            st.sets.insert(
                name.to_string(),
                StickerSet {
                    name: name.to_string(),
                    title: name.to_string(),
                    stickers,
                },
            );
        }
        self
    }

    pub fn fail_next(&self, call: PlatformCall, err: PlatformError) {
        self.lock().faults.entry(call).or_default().push_back(err);
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, call: PlatformCall) -> usize {
        self.lock().calls.iter().filter(|c| **c == call).count()
    }

    pub fn uploaded_names(&self) -> Vec<String> {
        self.lock().uploaded_names.clone()
    }

    pub fn pack(&self, name: &str) -> Option<StickerSet> {
        self.lock().sets.get(name).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panicked test thread must not wedge the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin(&self, call: PlatformCall) -> Result<std::sync::MutexGuard<'_, State>, PlatformError> {
        let mut st = self.lock();
        st.calls.push(call);
        if let Some(err) = st.faults.get_mut(&call).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(st)
    }
}

fn next_id(counter: &mut u64, prefix: &str) -> String {
    *counter += 1;
    format!("{prefix}-{counter}")
}

fn append(st: &mut State, pack: &str, sticker: &InputSticker) -> Result<(), PlatformError> {
    let custom_emoji_id = next_id(&mut st.next_emoji, "emoji");
    let set = st
        .sets
        .get_mut(pack)
        .ok_or(PlatformError::StickerSetInvalid)?;
    set.stickers.push(PackSticker {
        file_id: sticker.file_id.clone(),
        custom_emoji_id,
    });
    Ok(())
}

#[async_trait::async_trait]
impl StickerPlatform for MemoryPlatform {
    async fn upload_sticker_file(
        &self,
        _owner_id: i64,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<String, PlatformError> {
        let mut st = self.begin(PlatformCall::Upload)?;
        if data.is_empty() {
            return Err(PlatformError::Other(format!("file '{file_name}' is empty")));
        }
        st.uploaded_names.push(file_name.to_string());
        Ok(next_id(&mut st.next_file, "file"))
    }

    async fn create_sticker_set(
        &self,
        _owner_id: i64,
        pack: &str,
        title: &str,
        stickers: &[InputSticker],
    ) -> Result<(), PlatformError> {
        let mut st = self.begin(PlatformCall::Create)?;
        if st.sets.contains_key(pack) {
            return Err(PlatformError::Other(
                "sticker set name is already occupied".to_string(),
            ));
        }
        st.sets.insert(
            pack.to_string(),
            StickerSet {
                name: pack.to_string(),
                title: title.to_string(),
                stickers: Vec::new(),
            },
        );
        for sticker in stickers {
            append(&mut st, pack, sticker)?;
        }
        Ok(())
    }

    async fn add_sticker_to_set(
        &self,
        _owner_id: i64,
        pack: &str,
        sticker: &InputSticker,
    ) -> Result<(), PlatformError> {
        let mut st = self.begin(PlatformCall::Extend)?;
        append(&mut st, pack, sticker)
    }

    async fn get_sticker_set(&self, pack: &str) -> Result<StickerSet, PlatformError> {
        let st = self.begin(PlatformCall::Fetch)?;
        st.sets
            .get(pack)
            .cloned()
            .ok_or(PlatformError::StickerSetInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sticker(file_id: &str) -> InputSticker {
        InputSticker {
            file_id: file_id.to_string(),
            emoji: "⭐️".to_string(),
        }
    }

    #[tokio::test]
    async fn create_then_extend_appends_in_order() {
        let p = MemoryPlatform::new();
        p.create_sticker_set(1, "pack", "Pack", &[sticker("a"), sticker("b")])
            .await
            .unwrap();
        p.add_sticker_to_set(1, "pack", &sticker("c")).await.unwrap();

        let set = p.get_sticker_set("pack").await.unwrap();
        let files: Vec<&str> = set.stickers.iter().map(|s| s.file_id.as_str()).collect();
        assert_eq!(files, vec!["a", "b", "c"]);
        assert_eq!(
            p.calls(),
            vec![PlatformCall::Create, PlatformCall::Extend, PlatformCall::Fetch]
        );
    }

    #[tokio::test]
    async fn queued_faults_fire_once() {
        let p = MemoryPlatform::new();
        p.fail_next(PlatformCall::Upload, PlatformError::VideoTooBig);

        assert_eq!(
            p.upload_sticker_file(1, "t.webm", vec![1]).await,
            Err(PlatformError::VideoTooBig)
        );
        assert!(p.upload_sticker_file(1, "t.webm", vec![1]).await.is_ok());
        assert_eq!(p.count_calls(PlatformCall::Upload), 2);
    }

    #[tokio::test]
    async fn unknown_pack_is_invalid() {
        let p = MemoryPlatform::new().with_pack("old", 3);
        assert_eq!(
            p.get_sticker_set("missing").await,
            Err(PlatformError::StickerSetInvalid)
        );
        assert_eq!(p.get_sticker_set("old").await.unwrap().stickers.len(), 3);
    }
}
