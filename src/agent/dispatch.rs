//! The request-dispatch state machine (spec.md §4.6): classifies an incoming
//! publish on a request topic into one of six branches and decides what the
//! agent must do next. Kept as a pure `&mut self` transition over
//! `InstanceRegistry`/`CallCorrelator`; the actual MQTT I/O the outcome
//! implies (publish, subscribe, unsubscribe) is performed by the caller
//! (`agent::connection`), which is what lets this be tested without a
//! broker.

use serde_json::Value;
use tracing::warn;

use super::adapter::AdapterCall;
use super::correlator::CallCorrelator;
use super::instance_registry::{CreateOutcome, InstanceRegistry};
use crate::protocol::envelope::{CallOutcome, Envelope, EnvelopeError};
use crate::protocol::presence;
use crate::protocol::topic::{self, RequestTopic, TopicError, STATIC_INSTANCE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    CreateInstance,
    DeleteInstance,
    StaticGenericCall,
    StaticNamedCall,
    InstanceGenericCall,
    InstanceNamedCall,
}

fn classify(instance: &str, function: &str) -> Plan {
    match (instance, function) {
        (STATIC_INSTANCE, "__createShared__") => Plan::CreateInstance,
        (STATIC_INSTANCE, "__delete__") => Plan::DeleteInstance,
        (STATIC_INSTANCE, "call") => Plan::StaticGenericCall,
        (STATIC_INSTANCE, _) => Plan::StaticNamedCall,
        (_, "call") => Plan::InstanceGenericCall,
        (_, _) => Plan::InstanceNamedCall,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplyMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Reply(ReplyMessage),
    InstanceCreated { reply: ReplyMessage, subscribe_filter: String },
    InstanceDeleted { reply: ReplyMessage, unsubscribe_filter: String },
    Invoke(AdapterCall),
    /// Topic shape or payload was malformed; no reply topic can be trusted
    /// (spec.md §4.2, §7), so nothing is published anywhere.
    Dropped,
}

pub struct Dispatcher {
    functions: Vec<String>,
    registry: InstanceRegistry,
    correlator: CallCorrelator,
}

impl Dispatcher {
    pub fn new(functions: Vec<String>) -> Self {
        Self {
            functions,
            registry: InstanceRegistry::new(),
            correlator: CallCorrelator::new(),
        }
    }

    pub fn instances(&self) -> &[String] {
        self.registry.instances()
    }

    pub fn class_info_payload(&self) -> Vec<u8> {
        presence::class_info_payload(self.registry.instances(), &self.functions)
    }

    pub fn pending_count(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Turns an adapter completion into the reply the correlator owed, if
    /// any (spec.md §4.5).
    pub fn resolve(&mut self, call_id: u64, outcome: CallOutcome) -> Option<ReplyMessage> {
        let envelope = self.correlator.resolve(call_id, outcome)?;
        let topic = envelope.reply_topic()?.to_string();
        Some(ReplyMessage { topic, payload: envelope.to_payload() })
    }

    pub fn handle_publish(&mut self, topic: &str, payload: &[u8]) -> DispatchOutcome {
        let request = match topic::parse_request_topic(topic) {
            Ok(Some(request)) => request,
            Ok(None) => return DispatchOutcome::Dropped,
            Err(TopicError::UnexpectedShape(segments)) => {
                warn!(segments, topic, "dropping publish with malformed topic shape");
                return DispatchOutcome::Dropped;
            }
        };

        let mut envelope = match Envelope::parse(payload) {
            Ok(envelope) => envelope,
            Err(EnvelopeError::Json(error)) => {
                warn!(topic, %error, "dropping publish with malformed JSON payload");
                return DispatchOutcome::Dropped;
            }
            Err(EnvelopeError::NotAnObject) => {
                warn!(topic, "dropping publish whose payload is not a JSON object");
                return DispatchOutcome::Dropped;
            }
        };

        let context = if request.is_static() { request.class.clone() } else { request.instance.clone() };
        envelope.set_context(context);
        envelope.set_function(request.function.clone());

        if envelope.reply_topic().is_none() {
            warn!(topic, "dropping request with no reply topic in the 's' field");
            return DispatchOutcome::Dropped;
        }

        let args = envelope.args();
        match classify(&request.instance, &request.function) {
            Plan::CreateInstance => self.create_instance(envelope, &args, &request),
            Plan::DeleteInstance => self.delete_instance(envelope, &args, &request),
            Plan::StaticGenericCall => self.generic_call(envelope, &args, None),
            Plan::StaticNamedCall => {
                let function = request.function.clone();
                self.named_call(envelope, function, args, None)
            }
            Plan::InstanceGenericCall => self.generic_call(envelope, &args, Some(request.instance.clone())),
            Plan::InstanceNamedCall => {
                let function = request.function.clone();
                let instance = Some(request.instance.clone());
                self.named_call(envelope, function, args, instance)
            }
        }
    }

    fn create_instance(&mut self, envelope: Envelope, args: &[Value], request: &RequestTopic) -> DispatchOutcome {
        let Some(name) = args.first().and_then(Value::as_str) else {
            return self.dispatch_error(envelope, "__createShared__ requires the new instance name as its first argument");
        };
        if name == STATIC_INSTANCE {
            return self.dispatch_error(envelope, "__static__ is a reserved instance name");
        }

        let outcome = self.registry.create(name);
        let reply = self.reply_with_result(envelope, Value::String(name.to_string()));
        match outcome {
            CreateOutcome::Created => DispatchOutcome::InstanceCreated {
                reply,
                subscribe_filter: topic::instance_topic_filter(&request.domain, &request.agent, name),
            },
            CreateOutcome::AlreadyExists => DispatchOutcome::Reply(reply),
        }
    }

    fn delete_instance(&mut self, envelope: Envelope, args: &[Value], request: &RequestTopic) -> DispatchOutcome {
        let Some(name) = args.first().and_then(Value::as_str) else {
            return self.dispatch_error(envelope, "__delete__ requires the instance name as its first argument");
        };

        let existed = self.registry.delete(name);
        let reply = self.reply_with_result(envelope, Value::Bool(existed));
        if existed {
            DispatchOutcome::InstanceDeleted {
                reply,
                unsubscribe_filter: topic::instance_topic_filter(&request.domain, &request.agent, name),
            }
        } else {
            DispatchOutcome::Reply(reply)
        }
    }

    fn generic_call(&mut self, envelope: Envelope, args: &[Value], instance: Option<String>) -> DispatchOutcome {
        let Some(function) = args.first().and_then(Value::as_str).map(str::to_string) else {
            return self.dispatch_error(envelope, "generic 'call' requires the target function name as its first argument");
        };
        self.invoke(envelope, function, args[1..].to_vec(), instance)
    }

    fn named_call(&mut self, envelope: Envelope, function: String, args: Vec<Value>, instance: Option<String>) -> DispatchOutcome {
        self.invoke(envelope, function, args, instance)
    }

    fn invoke(&mut self, envelope: Envelope, function: String, args: Vec<Value>, instance: Option<String>) -> DispatchOutcome {
        let args_json = serde_json::to_string(&Value::Array(args)).unwrap_or_else(|_| "[]".to_string());
        let call_id = self.correlator.register(envelope);
        DispatchOutcome::Invoke(AdapterCall { call_id, function, args_json, instance })
    }

    fn reply_with_result(&self, envelope: Envelope, result: Value) -> ReplyMessage {
        let topic = envelope.reply_topic().expect("checked before dispatch").to_string();
        ReplyMessage { topic, payload: envelope.with_result(result).to_payload() }
    }

    /// spec.md §7's DispatchError row: the two synchronous branches and the
    /// generic-call name extraction can fail before any adapter call is
    /// made, in which case nothing was registered in the correlator to
    /// discard; the reply is built and returned directly.
    fn dispatch_error(&self, envelope: Envelope, message: &str) -> DispatchOutcome {
        let topic = envelope.reply_topic().expect("checked before dispatch").to_string();
        let payload = envelope.with_error(format!("Error while calling remote function: {message}")).to_payload();
        DispatchOutcome::Reply(ReplyMessage { topic, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(vec!["myFunc".to_string()])
    }

    fn reply_value(reply: &ReplyMessage) -> Value {
        serde_json::from_slice(&reply.payload).unwrap()
    }

    #[test]
    fn create_shared_subscribes_and_replies_with_the_instance_name() {
        let mut d = dispatcher();
        let outcome = d.handle_publish(
            "acme/a1/Session/__static__/__createShared__",
            br#"{"a":["sess1"],"s":"rep/1","i":1}"#,
        );
        match outcome {
            DispatchOutcome::InstanceCreated { reply, subscribe_filter } => {
                assert_eq!(reply.topic, "rep/1");
                assert_eq!(reply_value(&reply)["r"], json!("sess1"));
                assert_eq!(subscribe_filter, "acme/a1/Session/sess1/+");
            }
            other => panic!("expected InstanceCreated, got {other:?}"),
        }
        assert_eq!(d.instances(), &["sess1".to_string()]);
    }

    #[test]
    fn member_call_dispatches_to_adapter_and_resolves() {
        let mut d = dispatcher();
        d.handle_publish("acme/a1/Session/__static__/__createShared__", br#"{"a":["sess1"],"s":"rep/1","i":1}"#);

        let outcome = d.handle_publish("acme/a1/Session/sess1/myFunc", br#"{"a":[2,3],"s":"rep/2","i":2}"#);
        let call = match outcome {
            DispatchOutcome::Invoke(call) => call,
            other => panic!("expected Invoke, got {other:?}"),
        };
        assert_eq!(call.function, "myFunc");
        assert_eq!(call.args_json, "[2,3]");
        assert_eq!(call.instance.as_deref(), Some("sess1"));

        let reply = d.resolve(call.call_id, crate::protocol::envelope::parse_adapter_result("5")).unwrap();
        assert_eq!(reply.topic, "rep/2");
        assert_eq!(reply_value(&reply)["r"], json!(5));
    }

    #[test]
    fn adapter_error_propagates_as_e_field_only() {
        let mut d = dispatcher();
        let outcome = d.handle_publish("acme/a1/Session/__static__/someFn", br#"{"a":[],"s":"rep/3","i":3}"#);
        let call = match outcome {
            DispatchOutcome::Invoke(call) => call,
            other => panic!("expected Invoke, got {other:?}"),
        };
        let reply = d
            .resolve(call.call_id, crate::protocol::envelope::parse_adapter_result("__err__divide by zero"))
            .unwrap();
        let value = reply_value(&reply);
        assert_eq!(value["e"], json!("divide by zero"));
        assert!(value.get("r").is_none());
    }

    #[test]
    fn generic_static_call_extracts_target_function_from_first_argument() {
        let mut d = dispatcher();
        let outcome = d.handle_publish("acme/a1/Session/__static__/call", br#"{"a":["fn","x"],"s":"rep/4","i":4}"#);
        match outcome {
            DispatchOutcome::Invoke(call) => {
                assert_eq!(call.function, "fn");
                assert_eq!(call.args_json, r#"["x"]"#);
                assert!(call.instance.is_none());
            }
            other => panic!("expected Invoke, got {other:?}"),
        }
    }

    #[test]
    fn deleting_a_missing_instance_replies_false_without_republishing() {
        let mut d = dispatcher();
        let before = d.class_info_payload();
        let outcome = d.handle_publish("acme/a1/Session/__static__/__delete__", br#"{"a":["ghost"],"s":"rep/5","i":5}"#);
        match outcome {
            DispatchOutcome::Reply(reply) => {
                assert_eq!(reply_value(&reply)["r"], json!(false));
            }
            other => panic!("expected plain Reply (no classInfo republish), got {other:?}"),
        }
        assert_eq!(before, d.class_info_payload());
    }

    #[test]
    fn malformed_topic_is_silently_dropped() {
        let mut d = dispatcher();
        let outcome = d.handle_publish("acme/a1/Session/__static__/call/extra", br#"{"a":[],"s":"rep/6","i":6}"#);
        assert_eq!(outcome, DispatchOutcome::Dropped);
        assert_eq!(d.pending_count(), 0);
    }

    #[test]
    fn creating_reserved_static_name_is_a_dispatch_error() {
        let mut d = dispatcher();
        let outcome = d.handle_publish(
            "acme/a1/Session/__static__/__createShared__",
            br#"{"a":["__static__"],"s":"rep/7","i":7}"#,
        );
        match outcome {
            DispatchOutcome::Reply(reply) => {
                let value = reply_value(&reply);
                assert!(value["e"].as_str().unwrap().contains("reserved"));
            }
            other => panic!("expected Reply with error, got {other:?}"),
        }
        assert!(d.instances().is_empty());
    }

    #[test]
    fn creating_the_same_instance_twice_does_not_resubscribe() {
        let mut d = dispatcher();
        d.handle_publish("acme/a1/Session/__static__/__createShared__", br#"{"a":["sess1"],"s":"rep/8","i":8}"#);
        let outcome = d.handle_publish(
            "acme/a1/Session/__static__/__createShared__",
            br#"{"a":["sess1"],"s":"rep/9","i":9}"#,
        );
        match outcome {
            DispatchOutcome::Reply(reply) => assert_eq!(reply_value(&reply)["r"], json!("sess1")),
            other => panic!("expected plain Reply on re-create, got {other:?}"),
        }
        assert_eq!(d.instances().len(), 1);
    }
}
