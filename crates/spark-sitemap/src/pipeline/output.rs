//! 响应体写出：全量缓冲（需要预知长度）或有界缓冲流式写出。

use std::io::{BufWriter, Write};

use crate::{environment::Environment, error::BoxError};

/// 把 `produce` 产出的字节写入环境输出流。
///
/// - `content_length` 为真：先完整写入内存，设置 `Content-Length` 后一次性写出；
/// - 否则以 `buffer_size` 为界包裹 [`BufWriter`] 增量写出，`buffer_size == 0` 时直接写入。
pub(crate) fn write_body(
    environment: &dyn Environment,
    content_length: bool,
    buffer_size: usize,
    produce: impl FnOnce(&mut dyn Write) -> Result<(), BoxError>,
) -> Result<(), BoxError> {
    if content_length {
        let mut buffer = Vec::new();
        produce(&mut buffer)?;
        environment.set_content_length(u64::try_from(buffer.len()).unwrap_or(u64::MAX));
        let mut stream = environment.output_stream(0)?;
        stream.write_all(&buffer)?;
        stream.flush()?;
        return Ok(());
    }

    let mut stream = environment.output_stream(buffer_size)?;
    if buffer_size == 0 {
        produce(&mut stream)?;
        stream.flush()?;
        return Ok(());
    }
    let mut buffered = BufWriter::with_capacity(buffer_size, &mut stream);
    produce(&mut buffered)?;
    buffered.flush()?;
    Ok(())
}
