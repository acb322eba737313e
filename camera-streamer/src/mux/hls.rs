use common::MuxOptions;

use crate::process::Invocation;

/// HLS 输出参数
///
/// 分片按 epoch 起始编号命名；旧分片由 ffmpeg 的 `delete_segments` 清理。
pub fn output_args(invocation: &mut Invocation, options: &MuxOptions) {
    invocation.args(["-f", "hls"]);

    if options.segment_time != 0 {
        invocation
            .arg("-hls_time")
            .arg(options.segment_time.to_string());
    }
    if options.playlist_size != 0 {
        invocation
            .arg("-hls_list_size")
            .arg(options.playlist_size.to_string());
    }
    if options.storage_size != 0 {
        invocation
            .arg("-hls_delete_threshold")
            .arg(options.storage_size.to_string());
    }

    invocation.args([
        "-hls_flags",
        "delete_segments",
        "-hls_start_number_source",
        "epoch",
        "-hls_segment_filename",
    ]);
    invocation.arg(
        options
            .directory
            .join("livestream%d.ts")
            .to_string_lossy()
            .into_owned(),
    );
}
