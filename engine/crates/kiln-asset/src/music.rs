use std::sync::Arc;
use std::time::Duration;

use kiln_gfx::backend::GfxBackend;
use kiln_resource::resource::{LoadContext, Resource, ResourceKind};
use kiln_resource::status::LoadStatus;

const OGG_CAPTURE: &[u8; 4] = b"OggS";
const OGG_HEADER_SIZE: usize = 27;

/// Ogg Vorbis 流的基本信息
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct MusicInfo {
    pub channels: u8,
    pub sample_rate: u32,
    /// 最后一页的 granule position，即每个声道的总采样数
    pub total_samples: u64,
}
impl MusicInfo {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.total_samples as f64 / self.sample_rate as f64)
    }
}

/// Ogg Vorbis 音乐
///
/// 只解析流的头部并保留压缩数据，解码与播放由音频后端以流的方式完成
#[derive(Default)]
pub struct Music {
    info: Option<MusicInfo>,
    data: Option<Arc<[u8]>>,
}
// getters
impl Music {
    #[inline]
    pub fn info(&self) -> Option<MusicInfo> {
        self.info
    }

    /// 完整的压缩数据，交给音频后端解码
    pub fn data(&self) -> Option<Arc<[u8]>> {
        self.data.clone()
    }
}
// tools
impl Music {
    fn parse(data: &[u8]) -> Result<MusicInfo, String> {
        let first = Self::page_at(data, 0)?;
        if first.header_type & 0x02 == 0 {
            return Err("first page is not marked as beginning of stream".to_string());
        }

        // vorbis identification header
        let packet = first.body;
        if packet.len() < 30 || packet[0] != 0x01 || &packet[1..7] != b"vorbis" {
            return Err("stream does not start with a vorbis identification header".to_string());
        }
        let version = u32::from_le_bytes([packet[7], packet[8], packet[9], packet[10]]);
        if version != 0 {
            return Err(format!("unsupported vorbis version {version}"));
        }
        let channels = packet[11];
        let sample_rate = u32::from_le_bytes([packet[12], packet[13], packet[14], packet[15]]);
        if channels == 0 || sample_rate == 0 {
            return Err(format!("invalid stream format ({channels} channels, {sample_rate} Hz)"));
        }

        let last_offset = data
            .windows(OGG_CAPTURE.len())
            .rposition(|w| w == OGG_CAPTURE)
            .ok_or_else(|| "no ogg page found".to_string())?;
        let last = Self::page_at(data, last_offset)?;

        Ok(MusicInfo {
            channels,
            sample_rate,
            total_samples: last.granule_position,
        })
    }

    fn page_at(data: &[u8], offset: usize) -> Result<OggPage<'_>, String> {
        let header = data
            .get(offset..offset + OGG_HEADER_SIZE)
            .ok_or_else(|| format!("truncated ogg page at byte {offset}"))?;
        if &header[0..4] != OGG_CAPTURE {
            return Err(format!("missing ogg capture pattern at byte {offset}"));
        }
        if header[4] != 0 {
            return Err(format!("unsupported ogg version {}", header[4]));
        }

        let segments = header[26] as usize;
        let table_end = offset + OGG_HEADER_SIZE + segments;
        let table = data
            .get(offset + OGG_HEADER_SIZE..table_end)
            .ok_or_else(|| format!("truncated ogg segment table at byte {offset}"))?;
        let body_size: usize = table.iter().map(|s| *s as usize).sum();
        let body = data
            .get(table_end..table_end + body_size)
            .ok_or_else(|| format!("truncated ogg page body at byte {offset}"))?;

        let mut granule = [0u8; 8];
        granule.copy_from_slice(&header[6..14]);
        Ok(OggPage {
            header_type: header[5],
            granule_position: u64::from_le_bytes(granule),
            body,
        })
    }
}

struct OggPage<'a> {
    header_type: u8,
    granule_position: u64,
    body: &'a [u8],
}

impl Resource for Music {
    const KIND: ResourceKind = ResourceKind::Music;

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> LoadStatus {
        if self.info.is_some() {
            return LoadStatus::InvalidCall;
        }
        let data = match ctx.source() {
            Ok(data) => data,
            Err(status) => return status,
        };

        match Self::parse(data) {
            Ok(info) => {
                log::info!(
                    "Music ({}) loaded ({} channels, {} Hz, {:.1}s)",
                    ctx.name(),
                    info.channels,
                    info.sample_rate,
                    info.duration().as_secs_f32()
                );
                self.info = Some(info);
                self.data = Some(Arc::from(data));
                LoadStatus::Ok
            }
            Err(e) => {
                ctx.report_failure(format!("Music ({}) could not be decoded", ctx.name()), "Music Error Log", vec![e]);
                LoadStatus::InvalidData
            }
        }
    }

    fn unload(&mut self, _gfx: &Arc<dyn GfxBackend>) -> LoadStatus {
        self.data = None;
        match self.info.take() {
            Some(_) => LoadStatus::Ok,
            None => LoadStatus::InvalidCall,
        }
    }
}
