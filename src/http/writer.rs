//! Wire serialization of requests and replies.

use bytes::{BufMut, Bytes, BytesMut};

use crate::http::headers::Headers;
use crate::http::reply::Reply;
use crate::http::request::Request;
use crate::http::status::Status;

fn put_headers(buf: &mut BytesMut, headers: &Headers) {
    for (k, v) in headers.iter() {
        if k.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        buf.put_slice(k.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(v.as_bytes());
        buf.put_slice(b"\r\n");
    }
}

fn put_content_length(buf: &mut BytesMut, len: usize) {
    buf.put_slice(format!("Content-Length: {}\r\n", len).as_bytes());
}

pub fn serialize_request(req: &Request) -> Bytes {
    let body = req.body().as_slice();
    let mut buf = BytesMut::with_capacity(128 + body.len());

    // Request line
    buf.put_slice(
        format!("{} {} HTTP/1.{}\r\n", req.method(), req.path(), req.minor_version()).as_bytes(),
    );

    put_headers(&mut buf, req.headers());
    if !body.is_empty() {
        put_content_length(&mut buf, body.len());
    }

    // Header/body separator
    buf.put_slice(b"\r\n");
    buf.put_slice(body);

    buf.freeze()
}

pub fn serialize_reply(rep: &Reply) -> Bytes {
    let body = rep.body().as_slice();
    let mut buf = BytesMut::with_capacity(128 + body.len());
    let status = rep.status();

    // Status line
    buf.put_slice(
        format!(
            "HTTP/1.{} {} {}\r\n",
            rep.minor_version(),
            status.as_u16(),
            status.reason_phrase()
        )
        .as_bytes(),
    );

    put_headers(&mut buf, rep.headers());

    let bodiless = matches!(
        status,
        Status::SWITCHING_PROTOCOLS | Status::NO_CONTENT | Status::NOT_MODIFIED
    );
    if !bodiless {
        put_content_length(&mut buf, body.len());
    }

    buf.put_slice(b"\r\n");
    if !bodiless && !rep.is_head_only() {
        buf.put_slice(body);
    }

    buf.freeze()
}
