/*!
SOAP 1.1 action invocation: envelope construction, action/fault response parsing, and the
client call that drives an action over an [`http::Connection`](crate::http::Connection).

```http
POST path of control URL HTTP/1.1
HOST: host of control URL:port of control URL
CONTENT-LENGTH: bytes in body
CONTENT-TYPE: text/xml; charset="utf-8"
SOAPACTION: "urn:schemas-upnp-org:service:serviceType:v#actionName"

<?xml version="1.0"?>
<s:Envelope
   xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"
   s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
   <s:Body>
      <u:actionName xmlns:u="urn:schemas-upnp-org:service:serviceType:v">
         <argumentName>in arg value</argumentName>
      </u:actionName>
   </s:Body>
</s:Envelope>
```
*/

use crate::error::Error;
use crate::http::open_http_post;
use crate::xml;
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::net::SocketAddr;
use std::time::Duration;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

const SCHEMA_ENVELOPE: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const ENCODING_STYLE: &str = "http://schemas.xmlsoap.org/soap/encoding/";

/// A `serviceType#actionName` identifier, the body of a `SOAPACTION` header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Action {
    service_type: String,
    action_name: String,
}

impl Action {
    pub fn new(service_type: impl Into<String>, action_name: impl Into<String>) -> Self {
        Action {
            service_type: service_type.into(),
            action_name: action_name.into(),
        }
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn action_name(&self) -> &str {
        &self.action_name
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.service_type, self.action_name)
    }
}

/// A successful action response, or the UPnP-specific fault fields from a SOAP fault — the
/// `errorCode`/`errorDescription` pair carried inside the SOAP `<detail>`.
#[derive(Clone, Debug)]
pub enum ActionResult {
    Response(HashMap<String, String>),
    Fault { upnp_error_code: u32, upnp_error_description: String },
}

// ------------------------------------------------------------------------------------------------
// Public Functions
// ------------------------------------------------------------------------------------------------

/// Render the SOAP envelope body for invoking `action` with `arguments`, in declaration order.
pub fn build_action_envelope(action: &Action, arguments: &[(&str, &str)]) -> Vec<u8> {
    let mut body = String::new();
    body.push_str("<?xml version=\"1.0\"?>\r\n");
    body.push_str(&format!(
        "<s:Envelope xmlns:s=\"{}\" s:encodingStyle=\"{}\">\r\n",
        SCHEMA_ENVELOPE, ENCODING_STYLE
    ));
    body.push_str("<s:Body>\r\n");
    body.push_str(&format!(
        "<u:{} xmlns:u=\"{}\">\r\n",
        action.action_name, action.service_type
    ));
    for (name, value) in arguments {
        body.push_str(&format!(
            "<{name}>{value}</{name}>\r\n",
            name = name,
            value = xml::escape_text(value)
        ));
    }
    body.push_str(&format!("</u:{}>\r\n", action.action_name));
    body.push_str("</s:Body>\r\n");
    body.push_str("</s:Envelope>\r\n");
    body.into_bytes()
}

/// Render the SOAP envelope body for a successful action response, carrying `action`'s out
/// arguments — the device-side counterpart of [`build_action_envelope`].
pub fn build_action_response_envelope(action: &Action, arguments: &[(&str, &str)]) -> Vec<u8> {
    let mut body = String::new();
    body.push_str("<?xml version=\"1.0\"?>\r\n");
    body.push_str(&format!(
        "<s:Envelope xmlns:s=\"{}\" s:encodingStyle=\"{}\">\r\n",
        SCHEMA_ENVELOPE, ENCODING_STYLE
    ));
    body.push_str("<s:Body>\r\n");
    body.push_str(&format!(
        "<u:{}Response xmlns:u=\"{}\">\r\n",
        action.action_name, action.service_type
    ));
    for (name, value) in arguments {
        body.push_str(&format!(
            "<{name}>{value}</{name}>\r\n",
            name = name,
            value = xml::escape_text(value)
        ));
    }
    body.push_str(&format!("</u:{}Response>\r\n", action.action_name));
    body.push_str("</s:Body>\r\n");
    body.push_str("</s:Envelope>\r\n");
    body.into_bytes()
}

/// Render the `QueryStateVariableResponse` envelope body carrying `value`.
pub fn build_query_state_variable_response_envelope(value: &str) -> Vec<u8> {
    let mut body = String::new();
    body.push_str("<?xml version=\"1.0\"?>\r\n");
    body.push_str(&format!(
        "<s:Envelope xmlns:s=\"{}\" s:encodingStyle=\"{}\">\r\n",
        SCHEMA_ENVELOPE, ENCODING_STYLE
    ));
    body.push_str("<s:Body>\r\n");
    body.push_str(&format!(
        "<u:QueryStateVariableResponse xmlns:u=\"urn:schemas-upnp-org:control-1-0\">\r\n<return>{}</return>\r\n</u:QueryStateVariableResponse>\r\n",
        xml::escape_text(value)
    ));
    body.push_str("</s:Body>\r\n</s:Envelope>\r\n");
    body.into_bytes()
}

/// Render a SOAP fault envelope carrying a UPnP `errorCode`/`errorDescription` pair — the
/// device-side counterpart of [`xml::extract_soap_fault`].
pub fn build_fault_envelope(upnp_error_code: u32, upnp_error_description: &str) -> Vec<u8> {
    let mut body = String::new();
    body.push_str("<?xml version=\"1.0\"?>\r\n");
    body.push_str(&format!(
        "<s:Envelope xmlns:s=\"{}\" s:encodingStyle=\"{}\">\r\n",
        SCHEMA_ENVELOPE, ENCODING_STYLE
    ));
    body.push_str("<s:Body>\r\n<s:Fault>\r\n");
    body.push_str("<faultcode>s:Client</faultcode>\r\n<faultstring>UPnPError</faultstring>\r\n");
    body.push_str("<detail>\r\n<UPnPError xmlns=\"urn:schemas-upnp-org:control-1-0\">\r\n");
    body.push_str(&format!(
        "<errorCode>{}</errorCode>\r\n<errorDescription>{}</errorDescription>\r\n",
        upnp_error_code,
        xml::escape_text(upnp_error_description)
    ));
    body.push_str("</UPnPError>\r\n</detail>\r\n</s:Fault>\r\n</s:Body>\r\n</s:Envelope>\r\n");
    body.into_bytes()
}

/// Invoke `action` against `addr`/`control_url`, blocking for at most `timeout`.
pub fn send_action(
    addr: SocketAddr,
    control_url: &str,
    action: &Action,
    arguments: &[(&str, &str)],
    timeout: Duration,
) -> Result<ActionResult, Error> {
    let body = build_action_envelope(action, arguments);
    let soap_action_header = format!("\"{}\"", action);
    let mut stream = open_http_post(
        addr,
        control_url,
        "text/xml; charset=\"utf-8\"",
        body.len() as u64,
        &[("SOAPACTION", &soap_action_header)],
        timeout,
    )?;
    stream.write_chunk(&body)?;
    let response = stream.finish()?;

    if response.status_code == Some(200) {
        let values = xml::extract_action_response(&response.entity)?;
        Ok(ActionResult::Response(values))
    } else {
        let (code, description) = xml::extract_soap_fault(&response.entity)?;
        Ok(ActionResult::Fault {
            upnp_error_code: code,
            upnp_error_description: description,
        })
    }
}

/// `QueryStateVariable` (deprecated by the Device Architecture but still named explicitly as an
/// in-scope operation): fetch one service state variable's current value.
pub fn query_state_variable(
    addr: SocketAddr,
    control_url: &str,
    var_name: &str,
    timeout: Duration,
) -> Result<String, Error> {
    let action = Action::new(
        "urn:schemas-upnp-org:control-1-0",
        "QueryStateVariable",
    );
    let mut body = String::new();
    body.push_str("<?xml version=\"1.0\"?>\r\n");
    body.push_str(&format!(
        "<s:Envelope xmlns:s=\"{}\" s:encodingStyle=\"{}\">\r\n",
        SCHEMA_ENVELOPE, ENCODING_STYLE
    ));
    body.push_str("<s:Body>\r\n");
    body.push_str(&format!(
        "<u:QueryStateVariable xmlns:u=\"{}\">\r\n<varName>{}</varName>\r\n</u:QueryStateVariable>\r\n",
        action.service_type,
        xml::escape_text(var_name)
    ));
    body.push_str("</s:Body>\r\n</s:Envelope>\r\n");
    let body = body.into_bytes();

    let soap_action_header = "\"urn:schemas-upnp-org:control-1-0#QueryStateVariable\"".to_string();
    let mut stream = open_http_post(
        addr,
        control_url,
        "text/xml; charset=\"utf-8\"",
        body.len() as u64,
        &[("SOAPACTION", &soap_action_header)],
        timeout,
    )?;
    stream.write_chunk(&body)?;
    let response = stream.finish()?;
    if response.status_code == Some(200) {
        xml::extract_query_state_variable_response(&response.entity)
    } else {
        let (code, description) = xml::extract_soap_fault(&response.entity)?;
        Err(Error::OperationFailed {
            operation: format!("QueryStateVariable({})", var_name),
            status: format!("{}: {}", code, description),
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_well_formed_envelope() {
        let action = Action::new("urn:schemas-upnp-org:service:Dimming:1", "SetLoadLevelTarget");
        let body = build_action_envelope(&action, &[("newLoadlevelTarget", "50")]);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("<u:SetLoadLevelTarget xmlns:u=\"urn:schemas-upnp-org:service:Dimming:1\">"));
        assert!(text.contains("<newLoadlevelTarget>50</newLoadlevelTarget>"));
        assert!(text.contains("</s:Envelope>"));
    }

    #[test]
    fn action_display_matches_soapaction_form() {
        let action = Action::new("urn:schemas-upnp-org:service:Dimming:1", "GetLoadLevelTarget");
        assert_eq!(
            action.to_string(),
            "urn:schemas-upnp-org:service:Dimming:1#GetLoadLevelTarget"
        );
    }

    #[test]
    fn builds_well_formed_action_response() {
        let action = Action::new("urn:schemas-upnp-org:service:Dimming:1", "GetLoadLevelTarget");
        let body = build_action_response_envelope(&action, &[("RetLoadlevelTarget", "50")]);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("<u:GetLoadLevelTargetResponse xmlns:u=\"urn:schemas-upnp-org:service:Dimming:1\">"));
        assert!(text.contains("<RetLoadlevelTarget>50</RetLoadlevelTarget>"));
    }

    #[test]
    fn builds_well_formed_fault() {
        let body = build_fault_envelope(402, "Invalid Args");
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("<errorCode>402</errorCode>"));
        assert!(text.contains("<errorDescription>Invalid Args</errorDescription>"));
    }
}
