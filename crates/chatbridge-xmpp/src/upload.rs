//! XEP-0363 HTTP File Upload: service-discovery for the upload host,
//! the slot request, and the PUT that actually moves the bytes.
//!
//! Built on raw [`Element`] construction rather than typed
//! `xmpp-parsers` stanzas: the shapes here (disco items/info, the
//! `urn:xmpp:http:upload:0` request/slot) are small and stable, and
//! raw elements keep this module independent of exact upstream crate
//! field names.

use std::time::Duration;

use minidom::Element;
use uuid::Uuid;

use crate::actor::Actor;
use crate::error::{XmppError, XmppResult};

const IQ_TIMEOUT: Duration = Duration::from_secs(15);
const UPLOAD_NS: &str = "urn:xmpp:http:upload:0";
const DISCO_ITEMS_NS: &str = "http://jabber.org/protocol/disco#items";
const DISCO_INFO_NS: &str = "http://jabber.org/protocol/disco#info";

/// A granted upload slot: where to `PUT` the bytes, and where the
/// uploaded file is reachable afterward.
pub struct UploadSlot {
    pub put_url: String,
    pub get_url: String,
}

/// Walks the local domain's service-discovery items looking for one
/// that advertises the HTTP upload namespace.
pub async fn discover_upload_host(actor: &mut Actor, domain: &str) -> XmppResult<String> {
    let items = actor
        .send_iq_and_await(disco_iq(domain, DISCO_ITEMS_NS), IQ_TIMEOUT)
        .await?;
    let Some(query) = items.get_child("query", DISCO_ITEMS_NS) else {
        return Err(XmppError::Upload("disco#items returned no query".into()));
    };

    for item in query.children().filter(|child| child.name() == "item") {
        let Some(jid) = item.attr("jid") else {
            continue;
        };
        let Ok(info) = actor
            .send_iq_and_await(disco_iq(jid, DISCO_INFO_NS), IQ_TIMEOUT)
            .await
        else {
            continue;
        };
        let Some(info_query) = info.get_child("query", DISCO_INFO_NS) else {
            continue;
        };
        let supports_upload = info_query
            .children()
            .filter(|child| child.name() == "feature")
            .any(|feature| feature.attr("var") == Some(UPLOAD_NS));
        if supports_upload {
            return Ok(jid.to_string());
        }
    }

    Err(XmppError::Upload(format!(
        "no http upload host advertised under {domain}"
    )))
}

/// Requests a slot for a file of the given name/size/content-type.
pub async fn request_slot(
    actor: &mut Actor,
    host: &str,
    filename: &str,
    size: u64,
    content_type: &str,
) -> XmppResult<UploadSlot> {
    let id = Uuid::new_v4().to_string();
    let request = Element::builder("iq", "jabber:client")
        .attr("type", "get")
        .attr("to", host)
        .attr("id", id)
        .append(
            Element::builder("request", UPLOAD_NS)
                .attr("filename", filename)
                .attr("size", size.to_string())
                .attr("content-type", content_type)
                .build(),
        )
        .build();

    let response = actor.send_iq_and_await(request, IQ_TIMEOUT).await?;
    let Some(slot) = response.get_child("slot", UPLOAD_NS) else {
        return Err(XmppError::Upload("slot response missing slot element".into()));
    };
    let put_url = slot
        .get_child("put", UPLOAD_NS)
        .and_then(|put| put.attr("url"))
        .ok_or_else(|| XmppError::Upload("slot response missing put url".into()))?
        .to_string();
    let get_url = slot
        .get_child("get", UPLOAD_NS)
        .and_then(|get| get.attr("url"))
        .ok_or_else(|| XmppError::Upload("slot response missing get url".into()))?
        .to_string();

    Ok(UploadSlot { put_url, get_url })
}

/// Streams `bytes` to the granted slot.
pub async fn put_bytes(put_url: &str, content_type: &str, bytes: Vec<u8>) -> XmppResult<()> {
    let client = reqwest::Client::new();
    let response = client
        .put(put_url)
        .header("Content-Type", content_type)
        .body(bytes)
        .send()
        .await
        .map_err(|error| XmppError::Upload(error.to_string()))?;

    if !response.status().is_success() {
        return Err(XmppError::Upload(format!(
            "upload put returned status {}",
            response.status()
        )));
    }
    Ok(())
}

fn disco_iq(to: &str, ns: &str) -> Element {
    Element::builder("iq", "jabber:client")
        .attr("type", "get")
        .attr("to", to)
        .attr("id", Uuid::new_v4().to_string())
        .append(Element::builder("query", ns).build())
        .build()
}
