use std::borrow::Cow;
use std::collections::HashMap;
use std::io::{self, Read};
use std::net::TcpStream;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};

const MAX_HEADER_BYTES: usize = 8192;

#[derive(Debug)]
pub(super) enum RequestError {
    /// Declared body length, above the configured limit.
    TooLarge(usize),
    Malformed(String),
    Io(io::Error),
}

impl From<io::Error> for RequestError {
    fn from(err: io::Error) -> Self {
        RequestError::Io(err)
    }
}

#[derive(Debug)]
pub(super) struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// The uploaded image: the `image` part of a multipart form, or the raw
    /// body otherwise. `Ok(None)` when nothing was sent.
    ///
    /// A form whose `isBase64` field is `true` (or `1`) carries the image as
    /// base64 text, optionally as a `data:` URL; it is decoded here.
    pub fn image(&self) -> Result<Option<Cow<'_, [u8]>>, UploadError> {
        let content_type = self.headers.get("content-type").map(String::as_str);
        let Some(boundary) = content_type.and_then(multipart_boundary) else {
            return Ok(non_empty(Cow::Borrowed(self.body.as_slice())));
        };
        let Some(payload) = multipart_field(&self.body, boundary, "image") else {
            return Ok(None);
        };
        let is_base64 = multipart_field(&self.body, boundary, "isBase64")
            .map(|flag| {
                let flag = String::from_utf8_lossy(flag);
                let flag = flag.trim();
                flag.eq_ignore_ascii_case("true") || flag == "1"
            })
            .unwrap_or(false);
        if !is_base64 {
            return Ok(non_empty(Cow::Borrowed(payload)));
        }
        decode_base64_image(payload).map(|bytes| non_empty(Cow::Owned(bytes)))
    }
}

/// A multipart upload that could not be turned into image bytes.
#[derive(Debug, PartialEq, Eq)]
pub(super) struct UploadError(pub String);

fn non_empty(bytes: Cow<'_, [u8]>) -> Option<Cow<'_, [u8]>> {
    if bytes.is_empty() {
        None
    } else {
        Some(bytes)
    }
}

fn decode_base64_image(payload: &[u8]) -> Result<Vec<u8>, UploadError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| UploadError("base64 image is not valid text".to_string()))?;
    let text = text.trim();
    let encoded = match text.strip_prefix("data:") {
        Some(data_url) => data_url
            .split_once(',')
            .map(|(_, encoded)| encoded)
            .ok_or_else(|| UploadError("data url without a payload".to_string()))?,
        None => text,
    };
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    general_purpose::STANDARD
        .decode(compact)
        .map_err(|err| UploadError(format!("invalid base64 image data: {}", err)))
}

pub(super) fn read_request(
    stream: &mut TcpStream,
    max_body_bytes: usize,
) -> Result<HttpRequest, RequestError> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed("connection closed mid-request".to_string()));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestError::Malformed("request headers too large".to_string()));
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| RequestError::Malformed("empty request".to_string()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing method".to_string()))?;
    let raw_path = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing path".to_string()))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed("invalid content-length".to_string()))?,
        None => 0,
    };
    if content_length > max_body_bytes {
        return Err(RequestError::TooLarge(content_length));
    }

    let mut body = data[header_end..].to_vec();
    body.truncate(content_length);
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed("body shorter than content-length".to_string()));
        }
        let wanted = (content_length - body.len()).min(n);
        body.extend_from_slice(&buf[..wanted]);
    }

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body,
    })
}

fn multipart_boundary(content_type: &str) -> Option<&str> {
    let (mime, params) = content_type.split_once(';')?;
    if !mime.trim().eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params.split(';').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"'))
    })
}

/// Contents of the form field `name`, if present.
fn multipart_field<'a>(body: &'a [u8], boundary: &str, name: &str) -> Option<&'a [u8]> {
    let delimiter = format!("--{}", boundary);
    let mut rest = body;
    while let Some(start) = find(rest, delimiter.as_bytes()) {
        rest = &rest[start + delimiter.len()..];
        let headers_end = find(rest, b"\r\n\r\n")?;
        let part_headers = String::from_utf8_lossy(&rest[..headers_end]);
        let content = &rest[headers_end + 4..];
        let end = find(content, delimiter.as_bytes())?;
        if disposition_name(&part_headers).as_deref() == Some(name) {
            let part = &content[..end];
            return Some(part.strip_suffix(b"\r\n").unwrap_or(part));
        }
        rest = &content[end..];
    }
    None
}

/// The `name` parameter of a part's Content-Disposition header.
fn disposition_name(part_headers: &str) -> Option<String> {
    let disposition = part_headers.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case("content-disposition")
            .then_some(value)
    })?;
    disposition.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("name")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_image_field_from_multipart() {
        let body = b"--XyZ\r\n\
Content-Disposition: form-data; name=\"isBase64\"\r\n\r\n\
false\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"image\"; filename=\"capture.jpg\"\r\n\
Content-Type: image/jpeg\r\n\r\n\
\xFF\xD8\xFF\xE0jpeg\r\n\
--XyZ--\r\n";
        let boundary = multipart_boundary("multipart/form-data; boundary=XyZ").unwrap();
        assert_eq!(
            multipart_field(body, boundary, "image"),
            Some(&b"\xFF\xD8\xFF\xE0jpeg"[..])
        );
        assert_eq!(multipart_field(body, boundary, "missing"), None);
    }

    fn form_request(body: &[u8]) -> HttpRequest {
        let mut headers = HashMap::new();
        headers.insert(
            "content-type".to_string(),
            "multipart/form-data; boundary=XyZ".to_string(),
        );
        HttpRequest {
            method: "POST".to_string(),
            path: "/detect".to_string(),
            headers,
            body: body.to_vec(),
        }
    }

    #[test]
    fn filename_does_not_stand_in_for_field_name() {
        let body = b"--XyZ\r\n\
Content-Disposition: form-data; name=\"thumbnail\"; filename=\"image\"\r\n\r\n\
thumb\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"image\"; filename=\"capture.jpg\"\r\n\r\n\
full\r\n\
--XyZ--\r\n";
        assert_eq!(multipart_field(body, "XyZ", "image"), Some(&b"full"[..]));

        let only_filename = b"--XyZ\r\n\
Content-Disposition: form-data; name=\"thumbnail\"; filename=\"image\"\r\n\r\n\
thumb\r\n\
--XyZ--\r\n";
        assert_eq!(multipart_field(only_filename, "XyZ", "image"), None);
    }

    #[test]
    fn base64_flag_decodes_image_field() {
        let body = b"--XyZ\r\n\
Content-Disposition: form-data; name=\"isBase64\"\r\n\r\n\
true\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"image\"\r\n\r\n\
data:image/jpeg;base64,/9j/4AAQ\r\n\
--XyZ--\r\n";
        let req = form_request(body);
        let image = req.image().unwrap().unwrap();
        assert_eq!(&image[..], &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10][..]);
    }

    #[test]
    fn base64_flag_rejects_garbage() {
        let body = b"--XyZ\r\n\
Content-Disposition: form-data; name=\"isBase64\"\r\n\r\n\
1\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"image\"\r\n\r\n\
not*base64!\r\n\
--XyZ--\r\n";
        assert!(form_request(body).image().is_err());
    }

    #[test]
    fn false_flag_keeps_raw_bytes() {
        let body = b"--XyZ\r\n\
Content-Disposition: form-data; name=\"isBase64\"\r\n\r\n\
false\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"image\"\r\n\r\n\
/9j/\r\n\
--XyZ--\r\n";
        let req = form_request(body);
        let image = req.image().unwrap().unwrap();
        assert_eq!(&image[..], b"/9j/");
    }

    #[test]
    fn non_multipart_has_no_boundary() {
        assert_eq!(multipart_boundary("image/jpeg"), None);
        assert_eq!(
            multipart_boundary("multipart/form-data; boundary=\"a b\""),
            Some("a b")
        );
    }
}
