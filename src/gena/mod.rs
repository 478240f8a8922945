/*!
GENA: subscription lifecycle on both the control-point and device side, and the NOTIFY delivery
path with its retry/back-off policy.

```text
NOTIFY publisher path HTTP/1.1
HOST: publisher host:publisher port
CONTENT-TYPE: text/xml; charset="utf-8"
NT: upnp:event
NTS: upnp:propchange
SID: uuid:subscription-UUID
SEQ: event key
CONTENT-LENGTH: bytes in body

<?xml version="1.0"?>
<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
   <e:property>
      <variableName>new value</variableName>
   </e:property>
</e:propertyset>
```
*/

mod subscription;
pub use subscription::{ClientSubscription, ServiceSubscription};

mod notify;
pub use notify::{build_notify_body, build_notify_request, deliver_notify, RetryPolicy};

mod client;
pub use client::{renew, subscribe, unsubscribe};
