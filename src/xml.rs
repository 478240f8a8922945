/*!
The only XML this crate ever looks inside: three opaque seams (a SOAP action response, a SOAP
fault, and a GENA `<e:propertyset>`), read with `quick_xml`'s pull parser rather than a full DOM.
Everything else — the device description document itself, action argument encoding — is treated
as an already-formed byte buffer the caller hands in or gets back untouched.
*/

use crate::error::Error;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;

// ------------------------------------------------------------------------------------------------
// Public Functions
// ------------------------------------------------------------------------------------------------

/// Escape the five XML-significant characters in action argument text — SOAP body construction
/// has no richer escaping needs than this.
pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Extract `<actionName>` child elements as a flat name→text map from a successful action
/// response body (`<s:Body><u:actionNameResponse>...</u:actionNameResponse></s:Body>`).
pub fn extract_action_response(body: &[u8]) -> Result<HashMap<String, String>, Error> {
    extract_leaf_elements_after(body, |name| name.ends_with("Response"))
}

/// Extract the single `<return>` value from a `QueryStateVariableResponse` body.
pub fn extract_query_state_variable_response(body: &[u8]) -> Result<String, Error> {
    let values = extract_leaf_elements_after(body, |name| name == "QueryStateVariableResponse")?;
    values
        .get("return")
        .cloned()
        .ok_or_else(|| Error::BadResponse("missing <return> in QueryStateVariableResponse".to_string()))
}

/// Extract the action name and argument map from an inbound SOAP action request body
/// (`<s:Body><u:actionName xmlns:u="...">...</u:actionName></s:Body>`) — the device-side
/// counterpart of [`extract_action_response`].
pub fn extract_action_request(body: &[u8]) -> Result<(String, HashMap<String, String>), Error> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut action_name: Option<String> = None;
    let mut current_tag: Option<String> = None;
    let mut values = HashMap::new();

    loop {
        match reader.read_event(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = local_name(e.name());
                if action_name.is_none() {
                    if name != "Envelope" && name != "Body" {
                        action_name = Some(name);
                    }
                } else {
                    current_tag = Some(name);
                }
            }
            Ok(Event::Text(e)) => {
                if action_name.is_some() {
                    if let Some(tag) = &current_tag {
                        let text = e
                            .unescape_and_decode(&reader)
                            .map_err(|err| Error::MessageFormat(err.into()))?;
                        values.insert(tag.clone(), text);
                    }
                }
            }
            Ok(Event::End(_)) => current_tag = None,
            Ok(Event::Eof) => break,
            Err(err) => return Err(Error::MessageFormat(err.into())),
            _ => {}
        }
        buf.clear();
    }

    action_name
        .map(|name| (name, values))
        .ok_or_else(|| Error::BadRequest("malformed SOAP action request body".to_string()))
}

/// Extract the `varName` argument from an inbound `QueryStateVariable` request body.
pub fn extract_query_state_variable_request(body: &[u8]) -> Result<String, Error> {
    let values = extract_leaf_elements_after(body, |name| name == "QueryStateVariable")?;
    values
        .get("varName")
        .cloned()
        .ok_or_else(|| Error::BadRequest("missing <varName> in QueryStateVariable request".to_string()))
}

/// Extract `(UPnPError/errorCode, UPnPError/errorDescription)` from a SOAP fault body.
pub fn extract_soap_fault(body: &[u8]) -> Result<(u32, String), Error> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut current_tag = String::new();
    let mut code: Option<u32> = None;
    let mut description: Option<String> = None;

    loop {
        match reader.read_event(&mut buf) {
            Ok(Event::Start(ref e)) => {
                current_tag = local_name(e.name());
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape_and_decode(&reader)
                    .map_err(|err| Error::MessageFormat(err.into()))?;
                match current_tag.as_str() {
                    "errorCode" => code = text.trim().parse().ok(),
                    "errorDescription" => description = Some(text),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(Error::MessageFormat(err.into())),
            _ => {}
        }
        buf.clear();
    }

    match (code, description) {
        (Some(code), Some(description)) => Ok((code, description)),
        _ => Err(Error::BadResponse("malformed SOAP fault body".to_string())),
    }
}

/// Extract every `(SID, key, value)` triple out of a GENA `<e:propertyset>` NOTIFY body: each
/// `<e:property>` wraps exactly one state-variable element.
pub fn extract_propertyset(body: &[u8]) -> Result<HashMap<String, String>, Error> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut current_tag: Option<String> = None;
    let mut values = HashMap::new();

    loop {
        match reader.read_event(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = local_name(e.name());
                if name != "propertyset" && name != "property" {
                    current_tag = Some(name);
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(tag) = &current_tag {
                    let text = e
                        .unescape_and_decode(&reader)
                        .map_err(|err| Error::MessageFormat(err.into()))?;
                    values.insert(tag.clone(), text);
                }
            }
            Ok(Event::End(_)) => current_tag = None,
            Ok(Event::Eof) => break,
            Err(err) => return Err(Error::MessageFormat(err.into())),
            _ => {}
        }
        buf.clear();
    }
    Ok(values)
}

// ------------------------------------------------------------------------------------------------
// Private Functions
// ------------------------------------------------------------------------------------------------

/// Shared machinery for the two "find the wrapper element, then collect its leaf children as a
/// flat map" seams (`<actionNameResponse>`, `<QueryStateVariableResponse>`).
fn extract_leaf_elements_after(
    body: &[u8],
    is_wrapper: impl Fn(&str) -> bool,
) -> Result<HashMap<String, String>, Error> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut inside_wrapper = false;
    let mut current_tag: Option<String> = None;
    let mut values = HashMap::new();

    loop {
        match reader.read_event(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = local_name(e.name());
                if is_wrapper(&name) {
                    inside_wrapper = true;
                } else if inside_wrapper {
                    current_tag = Some(name);
                }
            }
            Ok(Event::Text(e)) => {
                if inside_wrapper {
                    if let Some(tag) = &current_tag {
                        let text = e
                            .unescape_and_decode(&reader)
                            .map_err(|err| Error::MessageFormat(err.into()))?;
                        values.insert(tag.clone(), text);
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let name = local_name(e.name());
                if is_wrapper(&name) {
                    inside_wrapper = false;
                }
                current_tag = None;
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(Error::MessageFormat(err.into())),
            _ => {}
        }
        buf.clear();
    }
    Ok(values)
}

fn local_name(qualified: &[u8]) -> String {
    let raw = String::from_utf8_lossy(qualified);
    match raw.rfind(':') {
        Some(idx) => raw[idx + 1..].to_string(),
        None => raw.to_string(),
    }
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_action_response_arguments() {
        let body = br#"<?xml version="1.0"?>
            <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
              <s:Body>
                <u:GetLoadLevelTargetResponse xmlns:u="urn:schemas-upnp-org:service:Dimming:1">
                  <RetLoadlevelTarget>42</RetLoadlevelTarget>
                </u:GetLoadLevelTargetResponse>
              </s:Body>
            </s:Envelope>"#;
        let values = extract_action_response(body).unwrap();
        assert_eq!(values.get("RetLoadlevelTarget"), Some(&"42".to_string()));
    }

    #[test]
    fn extracts_soap_fault_upnp_error() {
        let body = br#"<?xml version="1.0"?>
            <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
              <s:Body>
                <s:Fault>
                  <faultcode>s:Client</faultcode>
                  <faultstring>UPnPError</faultstring>
                  <detail>
                    <UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
                      <errorCode>402</errorCode>
                      <errorDescription>Invalid Args</errorDescription>
                    </UPnPError>
                  </detail>
                </s:Fault>
              </s:Body>
            </s:Envelope>"#;
        let (code, description) = extract_soap_fault(body).unwrap();
        assert_eq!(code, 402);
        assert_eq!(description, "Invalid Args");
    }

    #[test]
    fn extracts_propertyset_values() {
        let body = br#"<?xml version="1.0"?>
            <e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
              <e:property>
                <LoadLevelStatus>30</LoadLevelStatus>
              </e:property>
            </e:propertyset>"#;
        let values = extract_propertyset(body).unwrap();
        assert_eq!(values.get("LoadLevelStatus"), Some(&"30".to_string()));
    }

    #[test]
    fn escapes_reserved_characters() {
        assert_eq!(escape_text("a & b < c"), "a &amp; b &lt; c");
    }

    #[test]
    fn extracts_action_request_name_and_arguments() {
        let body = br#"<?xml version="1.0"?>
            <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
              <s:Body>
                <u:SetLoadLevelTarget xmlns:u="urn:schemas-upnp-org:service:Dimming:1">
                  <newLoadlevelTarget>50</newLoadlevelTarget>
                </u:SetLoadLevelTarget>
              </s:Body>
            </s:Envelope>"#;
        let (name, args) = extract_action_request(body).unwrap();
        assert_eq!(name, "SetLoadLevelTarget");
        assert_eq!(args.get("newLoadlevelTarget"), Some(&"50".to_string()));
    }

    #[test]
    fn extracts_query_state_variable_request_name() {
        let body = br#"<?xml version="1.0"?>
            <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
              <s:Body>
                <u:QueryStateVariable xmlns:u="urn:schemas-upnp-org:control-1-0">
                  <varName>LoadLevelStatus</varName>
                </u:QueryStateVariable>
              </s:Body>
            </s:Envelope>"#;
        assert_eq!(extract_query_state_variable_request(body).unwrap(), "LoadLevelStatus");
    }
}
