use common::MuxOptions;

use crate::process::Invocation;

pub fn output_args(invocation: &mut Invocation, options: &MuxOptions) {
    invocation.args([
        "-f",
        "dash",
        "-init_seg_name",
        "init.m4s",
        "-media_seg_name",
        "$Time$-$Number$.m4s",
    ]);

    if options.segment_time != 0 {
        invocation
            .arg("-seg_duration")
            .arg(options.segment_time.to_string());
    }
    if options.playlist_size != 0 {
        invocation
            .arg("-window_size")
            .arg(options.playlist_size.to_string());
    }
    if options.storage_size != 0 {
        invocation
            .arg("-extra_window_size")
            .arg(options.storage_size.to_string());
    }
}
