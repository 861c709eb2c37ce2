//! Minimal XML-RPC client: just enough of the protocol to log into an object
//! server and run searches on it.

use crate::strategies::ConnectionParams;
use quick_xml::{escape::escape, events::Event, Reader};
use std::time::Duration;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Double(f64),
    String(String),
    Array(Vec<Value>),
    Struct(Vec<(String, Value)>),
    Nil,
}
impl Value {
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn member(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(members) => members.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    fn write(&self, out: &mut String) {
        out.push_str("<value>");
        match self {
            Value::Int(i) => out.push_str(&format!("<int>{}</int>", i)),
            Value::Bool(b) => out.push_str(&format!("<boolean>{}</boolean>", *b as u8)),
            Value::Double(d) => out.push_str(&format!("<double>{}</double>", d)),
            Value::String(s) => out.push_str(&format!("<string>{}</string>", escape(s.as_str()))),
            Value::Array(items) => {
                out.push_str("<array><data>");
                items.iter().for_each(|item| item.write(out));
                out.push_str("</data></array>");
            }
            Value::Struct(members) => {
                out.push_str("<struct>");
                for (name, value) in members {
                    out.push_str(&format!("<member><name>{}</name>", escape(name.as_str())));
                    value.write(out);
                    out.push_str("</member>");
                }
                out.push_str("</struct>");
            }
            Value::Nil => out.push_str("<nil/>"),
        }
        out.push_str("</value>");
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[derive(Clone, Debug, Error)]
pub enum XmlRpcError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("fault {code}: {message}")]
    Fault { code: i64, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from(r#"<?xml version="1.0"?><methodCall>"#);
    out.push_str(&format!("<methodName>{}</methodName><params>", escape(method)));
    for param in params {
        out.push_str("<param>");
        param.write(&mut out);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

#[derive(Debug, Default)]
struct Node {
    name: String,
    text: String,
    children: Vec<Node>,
}
impl Node {
    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }
}

fn parse_tree(xml: &str) -> Result<Node, XmlRpcError> {
    let mut reader = Reader::from_str(xml);
    let mut stack = vec![Node::default()];
    loop {
        let event = reader
            .read_event()
            .map_err(|e| XmlRpcError::Malformed(e.to_string()))?;
        match event {
            Event::Start(e) => stack.push(Node {
                name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                ..Node::default()
            }),
            Event::Empty(e) => {
                let node = Node {
                    name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    ..Node::default()
                };
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| XmlRpcError::Malformed(e.to_string()))?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Event::CData(c) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| XmlRpcError::Malformed("unbalanced document".to_owned()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Err(XmlRpcError::Malformed("unbalanced document".to_owned())),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    match (stack.pop(), stack.is_empty()) {
        (Some(root), true) => Ok(root),
        _ => Err(XmlRpcError::Malformed("unterminated element".to_owned())),
    }
}

fn parse_value(node: &Node) -> Result<Value, XmlRpcError> {
    let typed = match node.children.first() {
        // untyped values are strings
        None => return Ok(Value::String(node.text.clone())),
        Some(typed) => typed,
    };
    let scalar = typed.text.trim();
    let malformed = |what: &str| XmlRpcError::Malformed(format!("bad {}: {:?}", what, scalar));
    match typed.name.as_str() {
        "int" | "i4" | "i8" => scalar.parse().map(Value::Int).map_err(|_| malformed("int")),
        "boolean" => match scalar {
            "1" => Ok(Value::Bool(true)),
            "0" => Ok(Value::Bool(false)),
            _ => Err(malformed("boolean")),
        },
        "double" => scalar.parse().map(Value::Double).map_err(|_| malformed("double")),
        "string" => Ok(Value::String(typed.text.clone())),
        "nil" => Ok(Value::Nil),
        "array" => typed
            .child("data")
            .map(|data| data.children.iter().map(parse_value).collect::<Result<Vec<_>, _>>())
            .unwrap_or_else(|| Ok(Vec::new()))
            .map(Value::Array),
        "struct" => typed
            .children
            .iter()
            .map(|member| {
                let name = member
                    .child("name")
                    .ok_or_else(|| XmlRpcError::Malformed("struct member without name".into()))?;
                let value = member
                    .child("value")
                    .ok_or_else(|| XmlRpcError::Malformed("struct member without value".into()))?;
                Ok((name.text.clone(), parse_value(value)?))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Struct),
        other => Err(XmlRpcError::Malformed(format!("unknown type <{}>", other))),
    }
}

pub fn decode_response(xml: &str) -> Result<Value, XmlRpcError> {
    let root = parse_tree(xml)?;
    let response = root
        .child("methodResponse")
        .ok_or_else(|| XmlRpcError::Malformed("missing <methodResponse>".to_owned()))?;
    if let Some(fault) = response.child("fault") {
        let value = fault
            .child("value")
            .map(parse_value)
            .transpose()?
            .unwrap_or(Value::Nil);
        let code = match value.member("faultCode") {
            Some(Value::Int(code)) => *code,
            _ => 0,
        };
        let message = match value.member("faultString") {
            Some(Value::String(message)) => message.clone(),
            _ => String::new(),
        };
        return Err(XmlRpcError::Fault { code, message });
    }
    response
        .child("params")
        .and_then(|params| params.child("param"))
        .and_then(|param| param.child("value"))
        .ok_or_else(|| XmlRpcError::Malformed("missing response value".to_owned()))
        .and_then(parse_value)
}

/// Seam between the object-RPC strategy and the wire.
pub trait RpcTransport: Send {
    fn call(
        &self,
        connection: &ConnectionParams,
        service: &str,
        method: &str,
        params: &[Value],
    ) -> Result<Value, XmlRpcError>;
}

/// XML-RPC over plain HTTP, endpoints at `http://host:port/xmlrpc/<service>`.
pub struct HttpTransport {
    http: reqwest::blocking::Client,
}
impl HttpTransport {
    pub fn new() -> Result<Self, XmlRpcError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| XmlRpcError::Transport(e.to_string()))?;
        Ok(Self { http })
    }
}
impl RpcTransport for HttpTransport {
    fn call(
        &self,
        connection: &ConnectionParams,
        service: &str,
        method: &str,
        params: &[Value],
    ) -> Result<Value, XmlRpcError> {
        let url = format!(
            "http://{}:{}/xmlrpc/{}",
            connection.host, connection.port, service
        );
        let body = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(encode_call(method, params))
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.text())
            .map_err(|e| XmlRpcError::Transport(e.to_string()))?;
        decode_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_is_encoded_with_escaping() {
        let xml = encode_call(
            "login",
            &[Value::from("db"), Value::from("a<b&c"), Value::Int(7), Value::from(true)],
        );
        assert_eq!(
            xml,
            "<?xml version=\"1.0\"?><methodCall><methodName>login</methodName><params>\
             <param><value><string>db</string></value></param>\
             <param><value><string>a&lt;b&amp;c</string></value></param>\
             <param><value><int>7</int></value></param>\
             <param><value><boolean>1</boolean></value></param>\
             </params></methodCall>"
        );
    }

    #[test]
    fn nested_domain_is_encoded() {
        let domain = Value::Array(vec![Value::Array(vec![
            Value::from("message_unread"),
            Value::from("="),
            Value::from(true),
        ])]);
        let xml = encode_call("execute", &[domain]);
        assert!(xml.contains(
            "<array><data><value><array><data><value><string>message_unread</string></value>"
        ));
    }

    #[test]
    fn id_list_response_is_decoded() {
        let xml = r#"<?xml version='1.0'?>
<methodResponse>
<params>
<param>
<value><array><data>
<value><int>4</int></value>
<value><i4>8</i4></value>
<value><int>15</int></value>
</data></array></value>
</param>
</params>
</methodResponse>"#;
        let value = decode_response(xml).unwrap();
        assert_eq!(
            value,
            Value::Array(vec![Value::Int(4), Value::Int(8), Value::Int(15)])
        );
    }

    #[test]
    fn scalar_responses_are_decoded() {
        let wrap = |v: &str| {
            format!(
                "<methodResponse><params><param><value>{}</value></param></params></methodResponse>",
                v
            )
        };
        assert_eq!(decode_response(&wrap("<boolean>0</boolean>")).unwrap(), Value::Bool(false));
        assert_eq!(decode_response(&wrap("plain &amp; simple")).unwrap(), Value::from("plain & simple"));
        assert_eq!(decode_response(&wrap("<double>1.5</double>")).unwrap(), Value::Double(1.5));
        assert_eq!(decode_response(&wrap("<nil/>")).unwrap(), Value::Nil);
        assert_eq!(decode_response(&wrap("<array><data/></array>")).unwrap(), Value::Array(vec![]));
    }

    #[test]
    fn fault_is_reported() {
        let xml = "<methodResponse><fault><value><struct>\
            <member><name>faultCode</name><value><int>2</int></value></member>\
            <member><name>faultString</name><value><string>Object project.issue doesn't exist</string></value></member>\
            </struct></value></fault></methodResponse>";
        match decode_response(xml) {
            Err(XmlRpcError::Fault { code, message }) => {
                assert_eq!(code, 2);
                assert_eq!(message, "Object project.issue doesn't exist");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            decode_response("<html><body>502 Bad Gateway</body></html>"),
            Err(XmlRpcError::Malformed(_))
        ));
        assert!(matches!(
            decode_response("<methodResponse><params>"),
            Err(XmlRpcError::Malformed(_))
        ));
    }
}
